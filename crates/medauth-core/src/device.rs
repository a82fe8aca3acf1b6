//! Best-effort device classification from a User-Agent header.
//!
//! The result is display metadata for session listings only. Nothing
//! security-relevant may depend on it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    ChromeMobile,
    ChromeDesktop,
    SafariMobile,
    SafariDesktop,
    Firefox,
    Unknown,
}

impl DeviceKind {
    /// Substring heuristic. Chrome is checked before Safari because Chrome
    /// user agents also advertise Safari.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let mobile = user_agent.contains("Mobile");
        if user_agent.contains("Chrome") {
            if mobile {
                DeviceKind::ChromeMobile
            } else {
                DeviceKind::ChromeDesktop
            }
        } else if user_agent.contains("Safari") {
            if mobile {
                DeviceKind::SafariMobile
            } else {
                DeviceKind::SafariDesktop
            }
        } else if user_agent.contains("Firefox") {
            DeviceKind::Firefox
        } else {
            DeviceKind::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::ChromeMobile => "Chrome Mobile",
            DeviceKind::ChromeDesktop => "Chrome Desktop",
            DeviceKind::SafariMobile => "Safari Mobile",
            DeviceKind::SafariDesktop => "Safari Desktop",
            DeviceKind::Firefox => "Firefox",
            DeviceKind::Unknown => "Unknown Device",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Session `device_name`: `None` when the client sent no user agent
pub fn device_name(user_agent: Option<&str>) -> Option<String> {
    user_agent
        .filter(|ua| !ua.trim().is_empty())
        .map(|ua| DeviceKind::from_user_agent(ua).label().to_string())
}
