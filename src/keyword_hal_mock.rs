use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use log::debug;

use crate::keyword_hal::{HalError, HalResult, KeywordService};

type Key = (String, String);

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordWrite {
    pub service: String,
    pub keyword: String,
    pub value: String,
    pub wait: bool,
}

/// In-memory keyword service. Each keyword holds a script of values: reads walk through
/// the script and then keep returning the last entry. A write replaces the script with
/// the written value and is recorded. Services marked disconnected fail every call.
#[derive(Debug, Default)]
pub struct KeywordServiceMock {
    values: RefCell<BTreeMap<Key, VecDeque<String>>>,
    writes: Vec<KeywordWrite>,
    poll_interval: Duration,
    disconnected: BTreeSet<String>,
}

impl KeywordServiceMock {
    pub fn with_value(self, service: &str, keyword: &str, value: &str) -> Self {
        self.with_values(service, keyword, &[value])
    }

    pub fn with_values(self, service: &str, keyword: &str, values: &[&str]) -> Self {
        self.values.borrow_mut().insert(
            (service.to_owned(), keyword.to_owned()),
            values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn disconnected(mut self, service: &str) -> Self {
        self.disconnected.insert(service.to_owned());
        self
    }

    fn check_connected(&self, service: &str) -> HalResult<()> {
        if self.disconnected.contains(service) {
            return Err(HalError::ServiceNotConnected(service.to_owned()));
        }
        Ok(())
    }

    pub fn writes(&self) -> &[KeywordWrite] {
        &self.writes
    }

    pub fn written(&self, service: &str, keyword: &str) -> Vec<&str> {
        self.writes
            .iter()
            .filter(|w| w.service == service && w.keyword == keyword)
            .map(|w| w.value.as_str())
            .collect()
    }
}

impl KeywordService for KeywordServiceMock {
    fn read(&self, service: &str, keyword: &str) -> HalResult<String> {
        self.check_connected(service)?;
        let mut values = self.values.borrow_mut();
        let script = values
            .get_mut(&(service.to_owned(), keyword.to_owned()))
            .filter(|script| !script.is_empty())
            .ok_or_else(|| HalError::UnknownKeyword {
                service: service.to_owned(),
                keyword: keyword.to_owned(),
            })?;
        let value = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        };
        debug!("read {service}.{keyword} = {value:?}");
        Ok(value)
    }

    fn write(&mut self, service: &str, keyword: &str, value: &str, wait: bool) -> HalResult<()> {
        self.check_connected(service)?;
        debug!("write {service}.{keyword} = {value:?} (wait={wait})");
        self.values
            .get_mut()
            .insert((service.to_owned(), keyword.to_owned()), VecDeque::from([value.to_owned()]));
        self.writes.push(KeywordWrite {
            service: service.to_owned(),
            keyword: keyword.to_owned(),
            value: value.to_owned(),
            wait,
        });
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
