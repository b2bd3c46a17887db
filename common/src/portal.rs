//! Request handling for the configuration portal.
//!
//! Transport-agnostic: the host server and the ESP-IDF httpd both forward
//! the three routes here and write the returned [`PortalResponse`] verbatim.

use serde::Deserialize;

use crate::settings::{EndpointSettings, SettingsStore};

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SaveForm {
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SaveForm {
    pub fn parse(body: &[u8]) -> Result<Self, serde_urlencoded::de::Error> {
        serde_urlencoded::from_bytes(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: String,
    /// Set when the device should reboot once the response is on the wire.
    pub restart_after_ms: Option<u64>,
}

impl PortalResponse {
    fn page(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            restart_after_ms: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::page(400, message_page("Bad Request", message))
    }
}

#[derive(Debug)]
pub struct ConfigService<S> {
    settings: EndpointSettings<S>,
    restart_delay_ms: u64,
}

impl<S: SettingsStore> ConfigService<S> {
    pub fn new(settings: EndpointSettings<S>, restart_delay_ms: u64) -> Self {
        Self {
            settings,
            restart_delay_ms,
        }
    }

    pub fn settings_mut(&mut self) -> &mut EndpointSettings<S> {
        &mut self.settings
    }

    pub fn index(&mut self) -> PortalResponse {
        match self.settings.endpoint() {
            Ok(endpoint) => PortalResponse::page(200, index_page(&endpoint)),
            Err(err) => PortalResponse::page(500, message_page("Error", &err.to_string())),
        }
    }

    pub fn save(&mut self, form: &SaveForm) -> PortalResponse {
        let Some(endpoint) = form.endpoint.as_deref() else {
            return PortalResponse::bad_request("Missing 'endpoint' field");
        };

        match self.settings.set_endpoint(endpoint) {
            Ok(()) => PortalResponse::page(200, saved_page(endpoint)),
            Err(err) => PortalResponse::page(500, message_page("Error", &err.to_string())),
        }
    }

    pub fn save_body(&mut self, body: &[u8]) -> PortalResponse {
        match SaveForm::parse(body) {
            Ok(form) => self.save(&form),
            Err(_) => PortalResponse::bad_request("Malformed form body"),
        }
    }

    pub fn restart(&self) -> PortalResponse {
        PortalResponse {
            status: 200,
            body: message_page("Restarting", "The device is restarting..."),
            restart_after_ms: Some(self.restart_delay_ms),
        }
    }
}

pub fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

const PAGE_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Digital Flame</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:520px;margin:2rem auto;padding:0 1rem;color:#111}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text]{width:100%;padding:.5rem;box-sizing:border-box}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

fn index_page(endpoint: &str) -> String {
    format!(
        r#"{PAGE_HEAD}  <h1>Digital Flame</h1>
  <form method="post" action="/save">
    <label for="endpoint">Endpoint URL</label>
    <input id="endpoint" name="endpoint" type="text" value="{}">
    <button type="submit">Save</button>
  </form>
  <form method="post" action="/restart">
    <button type="submit">Restart Device</button>
  </form>
{PAGE_TAIL}"#,
        html_escape(endpoint)
    )
}

fn saved_page(endpoint: &str) -> String {
    format!(
        r#"{PAGE_HEAD}  <h1>Saved</h1>
  <p>Endpoint set to <code>{}</code>.</p>
  <p><a href="/">Back</a></p>
{PAGE_TAIL}"#,
        html_escape(endpoint)
    )
}

fn message_page(title: &str, message: &str) -> String {
    format!(
        "{PAGE_HEAD}  <h1>{}</h1>\n  <p>{}</p>\n{PAGE_TAIL}",
        html_escape(title),
        html_escape(message)
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::settings::MemoryStore;

    fn service() -> ConfigService<MemoryStore> {
        ConfigService::new(EndpointSettings::new(MemoryStore::default()), 1_000)
    }

    #[test]
    fn save_persists_and_index_prefills() {
        let mut service = service();

        let saved = service.save_body(b"endpoint=https%3A%2F%2Fx.test");
        assert_eq!(saved.status, 200);
        assert!(saved.body.contains("https://x.test"));
        assert_eq!(
            service.settings_mut().store().get("endpoint"),
            Some("https://x.test")
        );

        let index = service.index();
        assert_eq!(index.status, 200);
        assert!(index.body.contains(r#"value="https://x.test""#));
    }

    #[test]
    fn index_escapes_stored_value() {
        let mut service = service();
        service
            .settings_mut()
            .set_endpoint(r#"<a href='x'>&"#)
            .unwrap();

        let index = service.index();

        assert!(index
            .body
            .contains(r#"value="&lt;a href=&#39;x&#39;&gt;&amp;""#));
        assert!(!index.body.contains("<a href='x'>"));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let mut service = service();
        service.settings_mut().set_endpoint("keep-me").unwrap();

        let response = service.save_body(b"other=value");

        assert_eq!(response.status, 400);
        assert_eq!(service.settings_mut().endpoint().unwrap(), "keep-me");
    }

    #[test]
    fn empty_body_is_rejected() {
        let mut service = service();

        assert_eq!(service.save_body(b"").status, 400);
        assert_eq!(service.settings_mut().store().get("endpoint"), None);
    }

    #[test]
    fn empty_endpoint_is_stored_as_is() {
        let mut service = service();
        service.settings_mut().set_endpoint("old").unwrap();

        let response = service.save(&SaveForm {
            endpoint: Some(String::new()),
        });

        assert_eq!(response.status, 200);
        assert_eq!(service.settings_mut().endpoint().unwrap(), "");
    }

    #[test]
    fn submitted_value_is_not_trimmed() {
        let mut service = service();

        service.save_body(b"endpoint=+spaced+");

        assert_eq!(service.settings_mut().endpoint().unwrap(), " spaced ");
    }

    #[test]
    fn restart_schedules_reboot() {
        let response = service().restart();

        assert_eq!(response.status, 200);
        assert_eq!(response.restart_after_ms, Some(1_000));
    }

    #[test]
    fn escapes_all_special_characters() {
        assert_eq!(html_escape(r#"<>&'""#), "&lt;&gt;&amp;&#39;&quot;");
        assert_eq!(html_escape("plain"), "plain");
    }
}
