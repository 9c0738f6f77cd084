use serde::Serialize;

/// Fire-and-forget notifications emitted by the ingester. Delivery is
/// not required for correctness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "new-domain")]
    NewDomain {
        #[serde(rename = "domainUrl")]
        domain_url: String,
    },
    #[serde(rename = "new-page")]
    NewPage {
        #[serde(rename = "pageUrl")]
        page_url: String,
    },
}

impl Event {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("event serializes")
    }
}

pub trait Publisher: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Default sink: one structured log line per event.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, event: &Event) {
        tracing::info!(target: "revq_events", "{}", event.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_domain_shape() {
        let event = Event::NewDomain {
            domain_url: "http://a.com".to_string(),
        };
        assert_eq!(
            event.to_json(),
            r#"{"type":"new-domain","domainUrl":"http://a.com"}"#
        );
    }

    #[test]
    fn new_page_shape() {
        let event = Event::NewPage {
            page_url: "http://a.com/x.html".to_string(),
        };
        assert_eq!(
            event.to_json(),
            r#"{"type":"new-page","pageUrl":"http://a.com/x.html"}"#
        );
    }
}
