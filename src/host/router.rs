use crate::activity::FocusChange;
use crate::bridge::{Command, FramedMessage, MessageKind};
use crate::error::{CaptureError, CaptureResult};
use crate::native::{NativeMessage, NativeMetadata};
use crate::sensing::BrowserProcess;
use crate::strategies::FocusedWindow;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// What to do with one frame the extension sent on its own initiative.
#[derive(Debug, Default, PartialEq)]
pub struct Routed {
    pub reply: Option<FramedMessage>,
    pub focus: Option<FocusChange>,
}

/// Turns extension traffic into focus changes for the browser that launched
/// the host.
pub struct FocusRouter {
    browser: BrowserProcess,
    display_name: String,
}

impl FocusRouter {
    pub fn new(browser: BrowserProcess) -> Self {
        let display_name = browser.display_name();
        Self {
            browser,
            display_name,
        }
    }

    pub fn process_name(&self) -> &str {
        &self.browser.name
    }

    pub fn route(&self, message: &FramedMessage) -> Routed {
        match message.kind {
            MessageKind::Request => self.route_request(message),
            MessageKind::Event => Routed {
                reply: None,
                focus: self.route_event(message),
            },
            MessageKind::Response => {
                log_debug!("ignoring unmatched response {}", message.id);
                Routed::default()
            }
        }
    }

    fn route_request(&self, message: &FramedMessage) -> Routed {
        match message.command {
            Command::New | Command::TabActivated | Command::TabUpdated => {
                match self.focused_window(message) {
                    Ok(window) => Routed {
                        reply: Some(message.respond(None)),
                        focus: Some(FocusChange::Focused(window)),
                    },
                    Err(err) => {
                        log_warn!("rejecting {} request: {err}", message.command);
                        Routed {
                            reply: Some(message.respond_error(err.to_string())),
                            focus: None,
                        }
                    }
                }
            }
            Command::TabClosed => Routed {
                reply: Some(message.respond(None)),
                focus: self.closed_window(message),
            },
            Command::BrowserBlurred => Routed {
                reply: Some(message.respond(None)),
                focus: Some(FocusChange::Lost),
            },
            ref other => Routed {
                reply: Some(message.respond_error(format!("native host does not serve {other}"))),
                focus: None,
            },
        }
    }

    fn route_event(&self, message: &FramedMessage) -> Option<FocusChange> {
        match message.command {
            Command::New | Command::TabActivated | Command::TabUpdated => {
                match self.focused_window(message) {
                    Ok(window) => Some(FocusChange::Focused(window)),
                    Err(err) => {
                        log_warn!("ignoring {} event: {err}", message.command);
                        None
                    }
                }
            }
            Command::TabClosed => self.closed_window(message),
            Command::BrowserBlurred => Some(FocusChange::Lost),
            ref other => {
                log_debug!("ignoring {other} event");
                None
            }
        }
    }

    /// A close without metadata cannot be matched to the open activity, so it
    /// changes nothing.
    fn closed_window(&self, message: &FramedMessage) -> Option<FocusChange> {
        match self.focused_window(message) {
            Ok(window) => Some(FocusChange::Closed(window)),
            Err(err) => {
                log_debug!("ignoring {} without metadata: {err}", message.command);
                None
            }
        }
    }

    fn focused_window(&self, message: &FramedMessage) -> CaptureResult<FocusedWindow> {
        let payload = message
            .payload
            .as_ref()
            .ok_or_else(|| CaptureError::MissingPayload(message.command.clone()))?;
        match NativeMessage::from_payload(payload)? {
            NativeMessage::NativeMetadata(metadata) => Ok(self.window_for(metadata)),
            other => Err(CaptureError::UnexpectedPayload {
                command: message.command.clone(),
                actual: other.kind().to_string(),
            }),
        }
    }

    fn window_for(&self, metadata: NativeMetadata) -> FocusedWindow {
        let capturable = metadata.is_capturable();
        let title = metadata
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| metadata.url.clone());
        FocusedWindow {
            process_id: self.browser.pid,
            process_name: self.browser.name.clone(),
            display_name: self.display_name.clone(),
            window_title: title,
            url: capturable.then_some(metadata.url),
            icon: metadata.icon_base64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Endpoint, Payload};

    fn router() -> FocusRouter {
        FocusRouter::new(BrowserProcess {
            pid: 77,
            name: "chrome".to_string(),
        })
    }

    fn metadata(url: &str, title: Option<&str>) -> Option<Payload> {
        NativeMessage::NativeMetadata(NativeMetadata {
            url: url.to_string(),
            title: title.map(str::to_string),
            icon_base64: None,
        })
        .to_payload()
        .ok()
    }

    #[test]
    fn new_request_is_acknowledged_and_focuses() {
        let request = FramedMessage::request(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::New,
            metadata("https://www.youtube.com/watch?v=abc123", Some("Talk")),
        );

        let routed = router().route(&request);

        let reply = routed.reply.expect("reply");
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.kind, MessageKind::Response);
        assert!(!reply.is_error());
        match routed.focus {
            Some(FocusChange::Focused(window)) => {
                assert_eq!(window.process_id, 77);
                assert_eq!(window.process_name, "chrome");
                assert_eq!(window.display_name, "Google Chrome");
                assert_eq!(window.window_title, "Talk");
                assert_eq!(
                    window.url.as_deref(),
                    Some("https://www.youtube.com/watch?v=abc123")
                );
            }
            other => panic!("unexpected focus {other:?}"),
        }
    }

    #[test]
    fn extension_only_commands_get_an_error_response() {
        let request = FramedMessage::request(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::GenerateAssets,
            None,
        );

        let routed = router().route(&request);
        assert!(routed.reply.expect("reply").is_error());
        assert_eq!(routed.focus, None);
    }

    #[test]
    fn new_request_without_metadata_is_rejected() {
        let request =
            FramedMessage::request(Endpoint::Background, Endpoint::NativeHost, Command::New, None);

        let routed = router().route(&request);
        assert!(routed.reply.expect("reply").is_error());
        assert_eq!(routed.focus, None);
    }

    #[test]
    fn internal_pages_focus_without_a_url() {
        let event = FramedMessage::event(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::TabActivated,
            metadata("chrome://settings", None),
        );

        let routed = router().route(&event);
        assert_eq!(routed.reply, None);
        match routed.focus {
            Some(FocusChange::Focused(window)) => {
                assert_eq!(window.url, None);
                assert_eq!(window.window_title, "chrome://settings");
            }
            other => panic!("unexpected focus {other:?}"),
        }
    }

    #[test]
    fn blur_loses_focus() {
        let event = FramedMessage::event(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::BrowserBlurred,
            None,
        );
        assert_eq!(router().route(&event).focus, Some(FocusChange::Lost));
    }

    #[test]
    fn tab_close_names_the_closed_page() {
        let event = FramedMessage::event(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::TabClosed,
            metadata("https://news-site.com/story", Some("Story")),
        );
        match router().route(&event).focus {
            Some(FocusChange::Closed(window)) => {
                assert_eq!(window.url.as_deref(), Some("https://news-site.com/story"));
                assert_eq!(window.process_name, "chrome");
            }
            other => panic!("unexpected focus {other:?}"),
        }

        let bare = FramedMessage::request(
            Endpoint::Background,
            Endpoint::NativeHost,
            Command::TabClosed,
            None,
        );
        let routed = router().route(&bare);
        assert!(!routed.reply.expect("reply").is_error());
        assert_eq!(routed.focus, None);
    }
}
