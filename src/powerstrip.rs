//! Blocking client for a web power switch exposing the `restapi/relay` endpoints.
//!
//! Outlets are addressed 0-based on the wire. Reads carry a short timeout so a
//! hung relay cannot stall the whole cycle; writes do not.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::Duration;

const OUTLET_READ_TIMEOUT: Duration = Duration::from_secs(7);
const CSRF_HEADER: (&str, &str) = ("X-CSRF", "x");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutletId(pub u32);

impl std::fmt::Display for OutletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub enum PowerStripError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
    Mismatch { outlet: OutletId, expected: bool, actual: bool },
}

impl core::fmt::Display for PowerStripError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PowerStripError::Transport(s) => write!(f, "transport error: {}", s),
            PowerStripError::Http { status, message } => write!(f, "http {}: {}", status, message),
            PowerStripError::Json(e) => write!(f, "json error: {}", e),
            PowerStripError::Mismatch {
                outlet,
                expected,
                actual,
            } => write!(
                f,
                "outlet {} reads {} after being set {}",
                outlet,
                on_off(*actual),
                on_off(*expected)
            ),
        }
    }
}

impl std::error::Error for PowerStripError {}

impl From<serde_json::Error> for PowerStripError {
    fn from(value: serde_json::Error) -> Self {
        PowerStripError::Json(value)
    }
}

impl From<ureq::Error> for PowerStripError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => PowerStripError::Http {
                status,
                message: String::from("<no body>"),
            },
            other => PowerStripError::Transport(other.to_string()),
        }
    }
}

pub fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

/// A switchable relay bank. `PowerStrip` talks to real hardware; tests use an
/// in-memory switch.
pub trait OutletSwitch {
    fn get_outlet(&self, outlet: OutletId) -> Result<bool, PowerStripError>;
    fn set_outlet(&self, outlet: OutletId, state: bool) -> Result<(), PowerStripError>;
}

pub struct PowerStrip {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl PowerStrip {
    pub fn new(base_url: impl Into<String>, username: &str, password: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        let authorization = format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)));
        PowerStrip {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization,
        }
    }

    fn outlet_url(&self, outlet: OutletId, leaf: &str) -> String {
        format!("{}/restapi/relay/outlets/{}/{}/", self.base_url, outlet.0, leaf)
    }

    fn check(res: http::Response<ureq::Body>) -> Result<http::Response<ureq::Body>, PowerStripError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let message = res
            .into_body()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(PowerStripError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

impl OutletSwitch for PowerStrip {
    fn get_outlet(&self, outlet: OutletId) -> Result<bool, PowerStripError> {
        let res = self
            .agent
            .get(&self.outlet_url(outlet, "physical_state"))
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .config()
            .timeout_global(Some(OUTLET_READ_TIMEOUT))
            .build()
            .call()?;
        let body = Self::check(res)?.into_body().read_to_string()?;
        Ok(serde_json::from_str(&body)?)
    }

    fn set_outlet(&self, outlet: OutletId, state: bool) -> Result<(), PowerStripError> {
        let value = if state { "true" } else { "false" };
        let res = self
            .agent
            .put(&self.outlet_url(outlet, "state"))
            .header("Authorization", &self.authorization)
            .header(CSRF_HEADER.0, CSRF_HEADER.1)
            .send_form([("value", value)])?;
        Self::check(res)?;
        Ok(())
    }
}
