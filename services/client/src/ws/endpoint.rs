use super::TransportError;
use reqwest::Url;

/// Builds the WebSocket URL for `server`, identifying as `identity`.
///
/// `http`/`https` addresses are mapped to `ws`/`wss`. The path gets a `/ws`
/// segment unless it already ends with one.
pub fn build_endpoint(server: &str, identity: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidAddress {
        address: server.to_string(),
        reason,
    };

    let mut url = Url::parse(server.trim()).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch to `{scheme}`")))?;

    if !url.path().trim_end_matches('/').ends_with("/ws") {
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    url.query_pairs_mut().append_pair("nickname", identity);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_ws_path_and_nickname() {
        let url = build_endpoint("http://10.0.0.2:8765", "alice").unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.2:8765/ws?nickname=alice");
    }

    #[test]
    fn test_existing_ws_path_is_kept() {
        let url = build_endpoint("wss://chat.example.com/ws", "bob").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/ws?nickname=bob");

        let url = build_endpoint("https://chat.example.com/room/ws/", "bob").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/room/ws/?nickname=bob");
    }

    #[test]
    fn test_nested_path_gets_ws_segment() {
        let url = build_endpoint("https://chat.example.com/room", "bob").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/room/ws?nickname=bob");
    }

    #[test]
    fn test_identity_is_encoded_once() {
        let url = build_endpoint("ws://localhost:8765", "小 明&x").unwrap();
        assert_eq!(
            url.query(),
            Some("nickname=%E5%B0%8F+%E6%98%8E%26x")
        );
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "小 明&x");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        assert!(matches!(
            build_endpoint("not a url", "a"),
            Err(TransportError::InvalidAddress { .. })
        ));
        assert!(matches!(
            build_endpoint("ftp://host", "a"),
            Err(TransportError::InvalidAddress { .. })
        ));
    }
}
