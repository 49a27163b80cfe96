//! Message templates posted for host state changes.

use chrono::{Local, Timelike};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::{fmt, fs, path::Path};

use crate::error::Error;

/// The only service type events are currently published under.
pub const STATUS_SERVICE: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    OnlineNormal,
    OnlineLate,
    Offline,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::OnlineNormal => "online.normal",
            Category::OnlineLate => "online.late",
            Category::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Local hours during which "came online" uses the late messages.
/// `until_hour` is exclusive and the window may wrap past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateWindow {
    from_hour: u32,
    until_hour: u32,
}

impl LateWindow {
    /// # Errors
    ///
    /// [`Error::Config`] if an hour is above 23 or both hours are equal.
    pub fn new(from_hour: u32, until_hour: u32) -> Result<Self, Error> {
        if from_hour > 23 || until_hour > 23 {
            return Err(Error::Config(format!(
                "late window hours must be within 0..=23, got {from_hour}..{until_hour}"
            )));
        }
        if from_hour == until_hour {
            return Err(Error::Config(format!(
                "late window {from_hour}..{until_hour} is empty"
            )));
        }
        Ok(Self {
            from_hour,
            until_hour,
        })
    }

    #[must_use]
    pub fn contains(&self, hour: u32) -> bool {
        if self.from_hour < self.until_hour {
            (self.from_hour..self.until_hour).contains(&hour)
        } else {
            hour >= self.from_hour || hour < self.until_hour
        }
    }
}

impl fmt::Display for LateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.from_hour, self.until_hour)
    }
}

#[derive(Debug, Deserialize)]
struct StatusFile {
    online: OnlineSection,
    offline: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OnlineSection {
    normal: Vec<String>,
    #[serde(default)]
    late: Vec<String>,
}

/// Immutable after load; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct StatusCatalog {
    online_normal: Vec<String>,
    online_late: Vec<String>,
    offline: Vec<String>,
    late_window: Option<LateWindow>,
}

impl StatusCatalog {
    #[must_use]
    pub fn new(online_normal: Vec<String>, online_late: Vec<String>, offline: Vec<String>) -> Self {
        Self {
            online_normal,
            online_late,
            offline,
            late_window: None,
        }
    }

    /// Reads a TOML status file.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be read, [`Error::TomlParse`] if a
    /// required section is missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// # Errors
    ///
    /// [`Error::TomlParse`] if a required section is missing or malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let file: StatusFile = toml::from_str(content)?;
        Ok(Self::new(file.online.normal, file.online.late, file.offline))
    }

    #[must_use]
    pub fn with_late_window(mut self, window: Option<LateWindow>) -> Self {
        self.late_window = window;
        self
    }

    #[must_use]
    pub fn late_window(&self) -> Option<LateWindow> {
        self.late_window
    }

    #[must_use]
    pub fn messages(&self, category: Category) -> &[String] {
        match category {
            Category::OnlineNormal => &self.online_normal,
            Category::OnlineLate => &self.online_late,
            Category::Offline => &self.offline,
        }
    }

    /// Picks a random message for the event using the current local hour.
    ///
    /// # Errors
    ///
    /// Same as [`StatusCatalog::pick_at`].
    pub fn pick(&self, service_type: &str, event_name: &str) -> Result<&str, Error> {
        self.pick_at(service_type, event_name, Local::now().hour())
    }

    /// Picks a random message as if the local time were `hour`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCategory`] for an event with no category,
    /// [`Error::EmptyCategory`] when the category has no messages.
    pub fn pick_at(&self, service_type: &str, event_name: &str, hour: u32) -> Result<&str, Error> {
        let category = self.category_for(service_type, event_name, hour)?;
        self.messages(category)
            .choose(&mut rand::rng())
            .map(String::as_str)
            .ok_or(Error::EmptyCategory(category))
    }

    /// Maps an event to the category it draws from.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCategory`] for anything but `status:online` and
    /// `status:offline`.
    pub fn category_for(
        &self,
        service_type: &str,
        event_name: &str,
        hour: u32,
    ) -> Result<Category, Error> {
        match (service_type, event_name) {
            (STATUS_SERVICE, "online") => {
                let late = self.late_window.is_some_and(|w| w.contains(hour));
                if late && !self.online_late.is_empty() {
                    Ok(Category::OnlineLate)
                } else {
                    Ok(Category::OnlineNormal)
                }
            }
            (STATUS_SERVICE, "offline") => Ok(Category::Offline),
            _ => Err(Error::UnknownCategory {
                service_type: service_type.to_string(),
                event_name: event_name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: &str = r#"
        offline = ["Sophie went to sleep", "Sophie is off"]

        [online]
        normal = ["Sophie is up", "Good morning from Sophie"]
        late = ["Sophie up at this hour?"]
    "#;

    fn catalog() -> StatusCatalog {
        StatusCatalog::from_toml_str(STATUSES).expect("valid catalog")
    }

    #[test]
    fn test_load_parses_all_sections() {
        let catalog = catalog();
        assert_eq!(catalog.messages(Category::OnlineNormal).len(), 2);
        assert_eq!(
            catalog.messages(Category::OnlineLate),
            ["Sophie up at this hour?"]
        );
        assert_eq!(catalog.messages(Category::Offline).len(), 2);
    }

    #[test]
    fn test_late_section_is_optional() {
        let catalog =
            StatusCatalog::from_toml_str("offline = [\"C\"]\n[online]\nnormal = [\"A\"]\n")
                .unwrap();
        assert!(catalog.messages(Category::OnlineLate).is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_source() {
        assert!(matches!(
            StatusCatalog::from_toml_str("offline = \"not a list\""),
            Err(Error::TomlParse(_))
        ));
        assert!(matches!(
            StatusCatalog::from_toml_str("[online]\nnormal = [\"A\"]\n"),
            Err(Error::TomlParse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            StatusCatalog::load("/nonexistent/statuses.toml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_online_picks_from_normal() {
        let catalog = catalog();
        for _ in 0..50 {
            let msg = catalog.pick("status", "online").unwrap();
            assert!(catalog.messages(Category::OnlineNormal).iter().any(|m| m == msg));
        }
    }

    #[test]
    fn test_offline_picks_from_offline() {
        let catalog = catalog();
        for _ in 0..50 {
            let msg = catalog.pick("status", "offline").unwrap();
            assert!(catalog.messages(Category::Offline).iter().any(|m| m == msg));
        }
    }

    #[test]
    fn test_unknown_combinations_are_errors() {
        let catalog = catalog();
        for (service, event) in [
            ("status", "rebooting"),
            ("power", "online"),
            ("", ""),
            ("STATUS", "online"),
        ] {
            assert!(
                matches!(
                    catalog.pick(service, event),
                    Err(Error::UnknownCategory { .. })
                ),
                "{service}:{event} should be unknown"
            );
        }
    }

    #[test]
    fn test_empty_category_is_an_error() {
        let catalog = StatusCatalog::new(vec!["A".to_string()], vec![], vec![]);
        assert!(matches!(
            catalog.pick("status", "offline"),
            Err(Error::EmptyCategory(Category::Offline))
        ));
    }

    #[test]
    fn test_late_window_selects_late_messages() {
        let catalog = catalog().with_late_window(Some(LateWindow::new(22, 5).unwrap()));
        assert_eq!(
            catalog.pick_at("status", "online", 23).unwrap(),
            "Sophie up at this hour?"
        );
        assert_eq!(
            catalog.category_for("status", "online", 12).unwrap(),
            Category::OnlineNormal
        );
        // offline is unaffected by the window
        assert_eq!(
            catalog.category_for("status", "offline", 23).unwrap(),
            Category::Offline
        );
    }

    #[test]
    fn test_late_window_falls_back_to_normal_when_late_is_empty() {
        let catalog = StatusCatalog::new(vec!["A".to_string()], vec![], vec!["C".to_string()])
            .with_late_window(Some(LateWindow::new(0, 6).unwrap()));
        assert_eq!(catalog.pick_at("status", "online", 3).unwrap(), "A");
    }

    #[test]
    fn test_late_window_contains() {
        let wrapping = LateWindow::new(22, 5).unwrap();
        assert!(wrapping.contains(22));
        assert!(wrapping.contains(0));
        assert!(wrapping.contains(4));
        assert!(!wrapping.contains(5));
        assert!(!wrapping.contains(21));

        let evening = LateWindow::new(19, 23).unwrap();
        assert!(evening.contains(19));
        assert!(!evening.contains(23));
        assert!(!evening.contains(2));
    }

    #[test]
    fn test_late_window_display() {
        assert_eq!(LateWindow::new(22, 5).unwrap().to_string(), "22:00-05:00");
    }

    #[test]
    fn test_late_window_rejects_invalid_hours() {
        assert!(LateWindow::new(24, 5).is_err());
        assert!(LateWindow::new(3, 3).is_err());
    }
}
