//! Weather categories, icons and the plain-text weather report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long a weather effect runs before the animation engine stops it.
pub const EFFECT_DURATION: Duration = Duration::from_secs(10);

/// Animation categories understood by the weather effect engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeatherCategory {
    Sunny,
    Cloudy,
    Overcast,
    Rain,
    HeavyRain,
    Snow,
    Fog,
    Thunderstorm,
}

impl WeatherCategory {
    pub const ALL: [WeatherCategory; 8] = [
        Self::Sunny,
        Self::Cloudy,
        Self::Overcast,
        Self::Rain,
        Self::HeavyRain,
        Self::Snow,
        Self::Fog,
        Self::Thunderstorm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sunny => "sunny",
            Self::Cloudy => "cloudy",
            Self::Overcast => "overcast",
            Self::Rain => "rain",
            Self::HeavyRain => "heavyRain",
            Self::Snow => "snow",
            Self::Fog => "fog",
            Self::Thunderstorm => "thunderstorm",
        }
    }

    /// Maps a provider description such as `小雨` or `雷阵雨` to a category.
    ///
    /// Checks run from the most to the least specific, so `雷阵雨` is a
    /// thunderstorm and `雨夹雪` is snow. Anything unrecognised is sunny.
    pub fn from_description(description: &str) -> Self {
        let description = description.trim();
        if description.contains('雷') {
            Self::Thunderstorm
        } else if description.contains('雪') {
            Self::Snow
        } else if description.contains('雾') || description.contains('霾') {
            Self::Fog
        } else if description == "晴" {
            Self::Sunny
        } else if description.contains('云') {
            Self::Cloudy
        } else if description == "阴" {
            Self::Overcast
        } else if description.contains('雨') {
            Self::Rain
        } else {
            Self::Sunny
        }
    }
}

impl fmt::Display for WeatherCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown weather category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for WeatherCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Emoji shown next to a description in the weather card.
///
/// The icon table is checked in a different order than
/// [`WeatherCategory::from_description`]: `雷阵雨` shows rain.
pub fn icon_for(description: &str) -> &'static str {
    if description.contains('雨') {
        "🌧️"
    } else if description.contains('雪') {
        "❄️"
    } else if description.contains('云') {
        "⛅"
    } else if description.contains('阴') {
        "☁️"
    } else if description.contains('雾') || description.contains('霾') {
        "🌫️"
    } else if description.contains('雷') {
        "⛈️"
    } else {
        "☀️"
    }
}

/// One day of a forecast. `temperature` looks like `25-18℃`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub weather: String,
    #[serde(default)]
    pub temperature: String,
}

impl Forecast {
    /// The daytime half of the temperature range, without its unit.
    pub fn day_temperature(&self) -> &str {
        self.temperature
            .split('-')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('℃')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeatherReport {
    #[serde(default)]
    pub city: String,
    #[serde(rename = "data", default)]
    pub forecasts: Vec<Forecast>,
}

impl WeatherReport {
    /// Today's forecast, if the provider returned a usable one.
    pub fn today(&self) -> Option<&Forecast> {
        self.forecasts
            .first()
            .filter(|day| !day.weather.is_empty() && !day.temperature.is_empty())
    }

    /// Renders the report as plain text for a chat message.
    ///
    /// Returns `None` when today's forecast is missing or incomplete.
    pub fn summary(&self) -> Option<String> {
        let today = self.today()?;
        let mut lines = vec![
            format!("{} {}", self.city, icon_for(&today.weather)),
            format!("{}℃ {}", today.day_temperature(), today.weather),
        ];
        if self.forecasts.len() >= 2 {
            lines.extend(self.forecasts.iter().take(2).map(|day| {
                format!(
                    "{} {} {} {}",
                    day.date,
                    icon_for(&day.weather),
                    day.weather,
                    day.temperature
                )
            }));
        }
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(days: &[(&str, &str, &str)]) -> WeatherReport {
        WeatherReport {
            city: "雅安市".to_string(),
            forecasts: days
                .iter()
                .map(|(date, weather, temperature)| Forecast {
                    date: date.to_string(),
                    weather: weather.to_string(),
                    temperature: temperature.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_category_priority() {
        assert_eq!(WeatherCategory::from_description("雷阵雨"), WeatherCategory::Thunderstorm);
        assert_eq!(WeatherCategory::from_description("雨夹雪"), WeatherCategory::Snow);
        assert_eq!(WeatherCategory::from_description("霾"), WeatherCategory::Fog);
        assert_eq!(WeatherCategory::from_description("晴"), WeatherCategory::Sunny);
        assert_eq!(WeatherCategory::from_description("多云"), WeatherCategory::Cloudy);
        assert_eq!(WeatherCategory::from_description("阴"), WeatherCategory::Overcast);
        assert_eq!(WeatherCategory::from_description("小雨"), WeatherCategory::Rain);
        assert_eq!(WeatherCategory::from_description("沙尘"), WeatherCategory::Sunny);
    }

    #[test]
    fn test_category_parse_by_name() {
        assert_eq!("heavyRain".parse::<WeatherCategory>(), Ok(WeatherCategory::HeavyRain));
        assert_eq!("Snow".parse::<WeatherCategory>(), Ok(WeatherCategory::Snow));
        assert_eq!(
            "hail".parse::<WeatherCategory>(),
            Err(UnknownCategory("hail".to_string()))
        );
        for category in WeatherCategory::ALL {
            assert_eq!(category.as_str().parse::<WeatherCategory>(), Ok(category));
        }
    }

    #[test]
    fn test_icon_order_differs_from_category_order() {
        assert_eq!(icon_for("雷阵雨"), "🌧️");
        assert_eq!(icon_for("雷电"), "⛈️");
        assert_eq!(icon_for("多云转阴"), "⛅");
        assert_eq!(icon_for("晴"), "☀️");
    }

    #[test]
    fn test_summary_with_forecast_lines() {
        let report = report(&[("周一", "小雨", "18-12℃"), ("周二", "晴", "22-13℃"), ("周三", "阴", "20-14℃")]);
        assert_eq!(
            report.summary().unwrap(),
            "雅安市 🌧️\n18℃ 小雨\n周一 🌧️ 小雨 18-12℃\n周二 ☀️ 晴 22-13℃"
        );
    }

    #[test]
    fn test_summary_single_day_has_no_forecast_lines() {
        let report = report(&[("周一", "晴", "30℃")]);
        assert_eq!(report.summary().unwrap(), "雅安市 ☀️\n30℃ 晴");
    }

    #[test]
    fn test_incomplete_report_has_no_summary() {
        assert_eq!(report(&[]).summary(), None);
        assert_eq!(report(&[("周一", "", "18-12℃")]).summary(), None);
    }

    #[test]
    fn test_report_decodes_provider_shape() {
        let report: WeatherReport = serde_json::from_str(
            r#"{"city":"北京","data":[{"date":"今天","weather":"多云","temperature":"25-16℃"}]}"#,
        )
        .unwrap();
        assert_eq!(report.today().unwrap().day_temperature(), "25");
    }
}
