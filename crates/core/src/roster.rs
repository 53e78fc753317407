//! Server-authoritative list of online users.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    users: Vec<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole list. Duplicates are dropped, first occurrence wins.
    pub fn replace<I, S>(&mut self, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        self.users = users
            .into_iter()
            .map(Into::into)
            .filter(|user| seen.insert(user.clone()))
            .collect();
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.users.iter().any(|user| user == identity)
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
