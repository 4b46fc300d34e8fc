pub mod booking_com;
pub mod makemytrip;
pub mod oyo;

use std::sync::Arc;

use crate::{
    adapter::ChannelAdapter, config::ChannelConfig, error::Result, logger::LogSink,
    types::ChannelKind,
};

pub use booking_com::BookingComAdapter;
pub use makemytrip::MakeMyTripAdapter;
pub use oyo::OyoAdapter;

/// Builds the adapter for `config.channel`. Fails with a `Validation` error
/// when the credentials are missing a key the channel needs.
pub fn build_adapter(
    config: ChannelConfig,
    sinks: Vec<Arc<dyn LogSink>>,
) -> Result<Arc<dyn ChannelAdapter>> {
    let adapter: Arc<dyn ChannelAdapter> = match config.channel {
        ChannelKind::BookingCom => Arc::new(BookingComAdapter::new(config, sinks)?),
        ChannelKind::MakeMyTrip => Arc::new(MakeMyTripAdapter::new(config, sinks)?),
        ChannelKind::Oyo => Arc::new(OyoAdapter::new(config, sinks)?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Credentials, error::ChannelError};

    #[test]
    fn test_builds_each_channel() {
        let cases = [
            (ChannelKind::BookingCom, Credentials::new().with("username", "u").with("password", "p")),
            (
                ChannelKind::MakeMyTrip,
                Credentials::new()
                    .with("username", "u")
                    .with("password", "p")
                    .with("api_key", "k")
                    .with("hotel_code", "H1"),
            ),
            (ChannelKind::Oyo, Credentials::new().with("api_key", "k").with("partner_id", "PX")),
        ];

        for (channel, credentials) in cases {
            let mut config = ChannelConfig::defaults_for(channel);
            config.credentials = credentials;
            let adapter = build_adapter(config, vec![]).unwrap();
            assert_eq!(adapter.channel(), channel);
        }
    }

    #[test]
    fn test_missing_credential_is_validation_error() {
        let mut config = ChannelConfig::defaults_for(ChannelKind::Oyo);
        config.credentials = Credentials::new().with("api_key", "k");
        match build_adapter(config, vec![]) {
            Err(ChannelError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("credentials.partner_id"))
            }
            _ => panic!("expected a validation error"),
        }
    }
}
