use std::sync::Arc;

use sb_domain::config::{ChannelConfig, KNOWN_CHANNEL_KINDS};
use sb_domain::error::{Error, Result};

use crate::adapter::{AdapterFactory, ChannelAdapter};
use crate::telegram::TelegramAdapter;
use crate::webhook::WebhookAdapter;

/// Builds the transports shipped with the gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, name: &str, config: &ChannelConfig) -> Result<Arc<dyn ChannelAdapter>> {
        match config.kind_for(name) {
            "telegram" => Ok(Arc::new(TelegramAdapter::new(name, config)?)),
            "webhook" => Ok(Arc::new(WebhookAdapter::new(name, config)?)),
            other => Err(Error::Validation(format!(
                "channels.{name}: unknown kind '{other}' (known: {})",
                KNOWN_CHANNEL_KINDS.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_by_kind() {
        let f = DefaultAdapterFactory;
        let tg = f
            .create(
                "telegram",
                &ChannelConfig {
                    token: Some("1:x".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(tg.kind(), "telegram");

        let hook = f
            .create(
                "ops",
                &ChannelConfig {
                    kind: Some("webhook".into()),
                    listen: Some("127.0.0.1:0".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hook.name(), "ops");
        assert_eq!(hook.kind(), "webhook");
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = DefaultAdapterFactory
            .create("irc", &ChannelConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown kind"));
    }
}
