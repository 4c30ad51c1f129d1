//! Unit tests for the public connection types that need no transport.

use std::error::Error;
use std::io;
use std::time::Duration;
use stomp_session::{
    AckMode, ConnectionOptions, StompError, SubscribeOptions, Token,
};

#[test]
fn ack_mode_wire_values() {
    assert_eq!(AckMode::Auto.to_string(), "auto");
    assert_eq!(AckMode::Client.to_string(), "client");
    assert_eq!(AckMode::ClientIndividual.to_string(), "client-individual");
    assert_eq!(AckMode::default(), AckMode::Client);
    for mode in [AckMode::Auto, AckMode::Client, AckMode::ClientIndividual] {
        assert_eq!(mode.as_str().parse::<AckMode>().unwrap(), mode);
    }
}

#[test]
fn connection_options_defaults_and_builder() {
    let defaults = ConnectionOptions::default();
    assert!(!defaults.always_disconnect_on_handler_error);
    assert_eq!(defaults.request_capacity, 32);
    assert!(defaults.span.is_none());

    let opts = ConnectionOptions::new()
        .always_disconnect_on_handler_error(true)
        .request_capacity(4);
    assert!(opts.always_disconnect_on_handler_error);
    assert_eq!(opts.request_capacity, 4);
}

#[test]
fn subscribe_options_builder() {
    let opts = SubscribeOptions::new()
        .header("selector", "priority > 3")
        .ack(AckMode::Auto)
        .error_destination("/queue/dlq");
    assert_eq!(
        opts.headers,
        vec![
            ("selector".to_string(), "priority > 3".to_string()),
            ("ack".to_string(), "auto".to_string()),
        ]
    );
    assert_eq!(opts.error_destination.as_deref(), Some("/queue/dlq"));
}

#[test]
fn error_display() {
    let io_err: StompError = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into();
    assert!(io_err.to_string().contains("io error"));
    assert!(io_err.to_string().contains("connection refused"));

    let timeout = StompError::ConnectTimeout(Duration::from_millis(250));
    assert!(timeout.to_string().contains("250ms"));

    let unknown = StompError::UnknownSubscription(Token {
        destination: "/queue/a".into(),
        id: "7".into(),
    });
    assert!(unknown.to_string().contains("/queue/a"));
    assert!(unknown.to_string().contains("7"));
}

#[test]
fn handler_error_exposes_source() {
    let err = StompError::handler("boom".into());
    let source = err.source().expect("handler errors carry their source");
    assert_eq!(source.to_string(), "boom");
}

#[test]
fn errors_are_shareable() {
    fn assert_traits<E: Error + Clone + Send + Sync + 'static>() {}
    assert_traits::<StompError>();
}
