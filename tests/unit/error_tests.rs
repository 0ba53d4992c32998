//! Unit tests for the application error type.

use agent_relay::AppError;

#[test]
fn display_prefixes_each_domain() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("locked".into()), "db: locked"),
        (AppError::Process("died".into()), "process: died"),
        (AppError::Stream("framing".into()), "stream: framing"),
        (AppError::Http("bind".into()), "http: bind"),
        (AppError::NotFound("session".into()), "not found: session"),
        (AppError::SessionBusy("s1".into()), "session busy: s1"),
        (
            AppError::CapacityExceeded("full".into()),
            "capacity exceeded: full",
        ),
        (AppError::Io("eof".into()), "io: eof"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_convert_to_config() {
    let toml_err = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn io_errors_convert_to_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
    let err: AppError = io_err.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe")));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_e: &E) {}
    assert_error(&AppError::NotFound("x".into()));
}
