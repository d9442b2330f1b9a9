use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::poll_machine::PollMachine;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_RETRIES: u32 = 3;

#[derive(Error, PartialEq, Clone, Debug)]
pub enum HalError {
    #[error("service {0} is not connected")]
    ServiceNotConnected(String),
    #[error("unknown keyword {service}.{keyword}")]
    UnknownKeyword { service: String, keyword: String },
    #[error("unexpected value {value:?} for {keyword}")]
    BadValue { keyword: String, value: String },
}

pub type HalResult<T> = Result<T, HalError>;

/// A condition on a single keyword, checked against its raw string value.
pub struct Condition<'a> {
    pub service: &'a str,
    pub keyword: &'a str,
    pub predicate: &'a dyn Fn(&str) -> bool,
}

/// Read/write access to the instrument's named hardware keywords, addressed by
/// `(service, keyword)`.
pub trait KeywordService {
    fn read(&self, service: &str, keyword: &str) -> HalResult<String>;

    /// With `wait` set, returns only once the control system has acted on the write.
    fn write(&mut self, service: &str, keyword: &str, value: &str, wait: bool) -> HalResult<()>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Polls until `condition` holds. Returns `Ok(false)` on timeout; a read that keeps
    /// failing past the retry budget is returned as an error.
    fn wait_for(&self, condition: &Condition, timeout: Duration) -> HalResult<bool> {
        let interval = self.poll_interval();
        debug!("Waiting up to {timeout:?} on {}.{}", condition.service, condition.keyword);
        let mut machine = PollMachine::with_timeout(timeout, interval, DEFAULT_READ_RETRIES);
        machine.command();
        machine.run(interval, || {
            let value = self.read(condition.service, condition.keyword)?;
            Ok((condition.predicate)(&value))
        })
    }

    fn read_int(&self, service: &str, keyword: &str) -> HalResult<i64> {
        let value = self.read(service, keyword)?;
        value.trim().parse().map_err(|_| HalError::BadValue { keyword: keyword.to_owned(), value })
    }

    fn read_float(&self, service: &str, keyword: &str) -> HalResult<f64> {
        let value = self.read(service, keyword)?;
        value.trim().parse().map_err(|_| HalError::BadValue { keyword: keyword.to_owned(), value })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::keyword_hal_mock::KeywordServiceMock;

    use super::*;

    #[test]
    fn test_typed_reads() {
        let hal = KeywordServiceMock::default()
            .with_value("mosfire", "CSUREADY", "2")
            .with_value("mosfire", "TEMP", " 77.5 ")
            .with_value("mosfire", "NAME", "abc");
        assert_eq!(hal.read_int("mosfire", "CSUREADY"), Ok(2));
        assert_eq!(hal.read_float("mosfire", "TEMP"), Ok(77.5));
        assert_eq!(
            hal.read_int("mosfire", "NAME"),
            Err(HalError::BadValue { keyword: "NAME".to_owned(), value: "abc".to_owned() }));
        assert!(matches!(hal.read_float("mosfire", "NAME"), Err(HalError::BadValue { .. })));
    }

    #[test]
    fn test_wait_for_sees_change() {
        let hal = KeywordServiceMock::default()
            .with_values("mcsus", "CSUSTAT", &["Creating Group.", "Creating Group.", "Setup complete."]);
        let condition = Condition {
            service: "mcsus",
            keyword: "CSUSTAT",
            predicate: &|v| v != "Creating Group.",
        };
        assert_eq!(hal.wait_for(&condition, Duration::from_secs(1)), Ok(true));
        assert_eq!(hal.read("mcsus", "CSUSTAT").unwrap(), "Setup complete.");
    }

    #[test]
    fn test_wait_for_times_out() {
        let hal = KeywordServiceMock::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_value("mosfire", "CSUREADY", "3");
        let condition = Condition { service: "mosfire", keyword: "CSUREADY", predicate: &|v| v == "2" };
        assert_eq!(hal.wait_for(&condition, Duration::from_millis(5)), Ok(false));
    }

    #[test]
    fn test_wait_for_unknown_keyword_fails() {
        let hal = KeywordServiceMock::default();
        let condition = Condition { service: "mosfire", keyword: "NOPE", predicate: &|_| true };
        assert!(matches!(
            hal.wait_for(&condition, Duration::from_secs(1)),
            Err(HalError::UnknownKeyword { .. })));
    }
}
