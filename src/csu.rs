use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::keyword_hal::{Condition, HalError, HalResult, KeywordService};
use crate::mask::{Mask, NUM_BARS};
use crate::mask_builder::MaskGeometryBuilder;
use crate::poll_machine::PollMachine;

pub const CSU_SERVICE: &str = "mcsus";

const CREATING_GROUP: &str = "Creating Group.";
const COLLISION_RE: &str = r"Setup aborted\.  Collision detected at row (\d+)";
const BAR_ON_TARGET_MM: f64 = 0.01;

#[derive(Error, Clone, Debug)]
pub enum CsuError {
    #[error(transparent)]
    Hal(#[from] HalError),
    #[error("CSU has experienced a fatal error")]
    Fatal,
    #[error("CSU is not ready: {0}")]
    NotReady(CsuReady),
    #[error("bar {bar:02} status is {status}")]
    BarFault { bar: usize, status: String },
    #[error("{status}")]
    Collision { row: u32, status: String },
    #[error("timed out waiting for the CSU to finish setting up")]
    SetupTimeout,
    #[error("timed out waiting for the CSU move to finish")]
    MoveTimeout,
    #[error("bar {0} is not in range 1-92")]
    InvalidBar(usize),
    #[error("bar {bar:02} is at {position_mm} mm but targeted {target_mm} mm")]
    BarOffTarget { bar: usize, position_mm: f64, target_mm: f64 },
}

pub type CsuResult<T> = Result<T, CsuError>;

/// Decoded `CSUREADY` keyword.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum CsuReady {
    Unknown,
    SystemStarted,
    ReadyForMove,
    Moving,
    Configuring,
    Error,
    SystemStopped,
}

impl CsuReady {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CsuReady::Unknown),
            1 => Some(CsuReady::SystemStarted),
            2 => Some(CsuReady::ReadyForMove),
            3 => Some(CsuReady::Moving),
            4 => Some(CsuReady::Configuring),
            -1 => Some(CsuReady::Error),
            -2 => Some(CsuReady::SystemStopped),
            _ => None,
        }
    }
}

impl fmt::Display for CsuReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CsuReady::Unknown => "Unknown",
            CsuReady::SystemStarted => "System Started",
            CsuReady::ReadyForMove => "Ready for Move",
            CsuReady::Moving => "Moving",
            CsuReady::Configuring => "Configuring",
            CsuReady::Error => "Error",
            CsuReady::SystemStopped => "System Stopped",
        };
        f.write_str(name)
    }
}

/// Timings and checks for CSU operations. Durations are in seconds so a partial JSON
/// file can override any of them.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CsuOptions {
    pub setup_timeout_secs: f64,
    pub move_timeout_secs: f64,
    /// The ready keyword lags behind a move command.
    pub execute_settle_secs: f64,
    pub ready_settle_secs: f64,
    pub read_retries: u32,
    pub check_conditions: bool,
}

impl Default for CsuOptions {
    fn default() -> Self {
        Self {
            setup_timeout_secs: 60.0,
            move_timeout_secs: 480.0,
            execute_settle_secs: 3.0,
            ready_settle_secs: 1.0,
            read_retries: 3,
            check_conditions: true,
        }
    }
}

impl CsuOptions {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// No settling delays, for simulated hardware.
    pub fn without_settling(self) -> Self {
        Self { execute_settle_secs: 0.0, ready_settle_secs: 0.0, ..self }
    }

    pub fn setup_timeout(&self) -> Duration {
        secs(self.setup_timeout_secs)
    }

    pub fn move_timeout(&self) -> Duration {
        secs(self.move_timeout_secs)
    }

    fn execute_settle(&self) -> Duration {
        secs(self.execute_settle_secs)
    }

    fn ready_settle(&self) -> Duration {
        secs(self.ready_settle_secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn bar_keyword(bar: usize, suffix: &str) -> String {
    format!("B{bar:02}{suffix}")
}

/// Configurable slit unit control over an explicit keyword service handle.
pub struct Csu<K: KeywordService> {
    hal: K,
    options: CsuOptions,
}

impl<K: KeywordService> Csu<K> {
    pub fn new(hal: K, options: CsuOptions) -> Self {
        Self { hal, options }
    }

    pub fn hal(&self) -> &K {
        &self.hal
    }

    pub fn into_hal(self) -> K {
        self.hal
    }

    fn read_ready(&self) -> HalResult<CsuReady> {
        let code = self.hal.read_int(CSU_SERVICE, "CSUREADY")?;
        CsuReady::from_code(code).ok_or_else(|| HalError::BadValue {
            keyword: "CSUREADY".to_owned(),
            value: code.to_string(),
        })
    }

    pub fn ready_state(&self) -> CsuResult<CsuReady> {
        let ready = self.read_ready()?;
        debug!("CSU state: {ready}");
        match ready {
            CsuReady::Error => Err(CsuError::Fatal),
            ready => Ok(ready),
        }
    }

    /// Fails when the CSU is in an error state or has not been started.
    pub fn check_ok(&self) -> CsuResult<()> {
        match self.ready_state()? {
            ready @ (CsuReady::Unknown | CsuReady::SystemStopped) => Err(CsuError::NotReady(ready)),
            _ => Ok(()),
        }
    }

    pub fn check_ready_for_move(&self) -> CsuResult<()> {
        match self.ready_state()? {
            CsuReady::ReadyForMove => Ok(()),
            ready => Err(CsuError::NotReady(ready)),
        }
    }

    pub fn check_bars_ok(&self) -> CsuResult<()> {
        for bar in 1..=NUM_BARS {
            let status = self.hal.read(CSU_SERVICE, &bar_keyword(bar, "STAT"))?;
            if status.trim() != "OK" {
                return Err(CsuError::BarFault { bar, status });
            }
        }
        Ok(())
    }

    fn precondition(&self, check: impl FnOnce(&Self) -> CsuResult<()>) -> CsuResult<()> {
        if self.options.check_conditions {
            check(self)
        } else {
            debug!("Skipping condition checks");
            Ok(())
        }
    }

    pub fn setup_mask(&mut self, mask: &Mask) -> CsuResult<()> {
        self.precondition(|csu| {
            csu.check_ok()?;
            csu.check_bars_ok()
        })?;

        info!("Setting up mask: {}", mask.name());
        debug!("Setting bar target position keywords");
        for slit in mask.slit_table() {
            for (bar, position_mm) in [
                (slit.right_bar_number(), slit.right_bar_position_mm()),
                (slit.left_bar_number(), slit.left_bar_position_mm()),
            ] {
                let keyword = bar_keyword(bar as usize, "TARG");
                debug!("  Setting {keyword} = {position_mm}");
                self.hal.write(CSU_SERVICE, &keyword, &position_mm.to_string(), true)?;
            }
        }

        debug!("Invoke SETUP process on CSU");
        self.hal.write(CSU_SERVICE, "SETUPGO", "1", true)?;
        self.hal.write(CSU_SERVICE, "SETUPNAME", mask.name(), true)?;

        let condition = Condition {
            service: CSU_SERVICE,
            keyword: "CSUSTAT",
            predicate: &|status| status.trim() != CREATING_GROUP,
        };
        if !self.hal.wait_for(&condition, self.options.setup_timeout())? {
            warn!("Timeout exceeded waiting for CSU setup of {}", mask.name());
            return Err(CsuError::SetupTimeout);
        }

        let status = self.hal.read(CSU_SERVICE, "CSUSTAT")?;
        if let Some(row) = collision_row(&status) {
            error!("{status}");
            return Err(CsuError::Collision { row, status });
        }

        self.precondition(|csu| {
            csu.check_ok()?;
            csu.check_bars_ok()
        })
    }

    /// Moves the bars to a mask that has already been set up.
    pub fn execute_mask(&mut self) -> CsuResult<()> {
        self.precondition(|csu| {
            csu.check_bars_ok()?;
            csu.check_ready_for_move()
        })?;
        info!("Executing CSU move");
        self.hal.write(CSU_SERVICE, "SETUPGO", "1", true)?;
        thread::sleep(self.options.execute_settle());
        Ok(())
    }

    /// Waits for a move to finish, raising [`CsuError::Fatal`] as soon as the CSU reports
    /// an error.
    pub fn wait_for_ready(&self, timeout: Duration) -> CsuResult<()> {
        self.precondition(Self::check_ok)?;
        debug!("Waiting for CSU to be ready");
        thread::sleep(self.options.ready_settle());

        let interval = self.hal.poll_interval();
        let mut machine = PollMachine::with_timeout(timeout, interval, self.options.read_retries);
        let mut last = None;
        let done = machine.run(interval, || {
            let ready = self.read_ready()?;
            last = Some(ready);
            Ok::<_, HalError>(matches!(ready, CsuReady::ReadyForMove | CsuReady::Error))
        })?;

        if last == Some(CsuReady::Error) {
            return Err(CsuError::Fatal);
        }
        if !done {
            warn!("Timeout exceeded on wait for CSU to finish");
            return Err(CsuError::MoveTimeout);
        }
        self.precondition(Self::check_ok)
    }

    /// Initialises the given bars, or every bar when `bars` is `None`. All bar numbers
    /// are checked before anything is written.
    pub fn initialise_bars(&mut self, bars: Option<&[usize]>) -> CsuResult<()> {
        let Some(bars) = bars else {
            info!("Initializing all bars");
            self.hal.write(CSU_SERVICE, "INITBAR", "0", true)?;
            return Ok(());
        };
        if let Some(&bad) = bars.iter().find(|&&bar| !(1..=NUM_BARS).contains(&bar)) {
            return Err(CsuError::InvalidBar(bad));
        }
        for bar in bars {
            info!("Initializing bar {bar}");
            self.hal.write(CSU_SERVICE, "INITBAR", &bar.to_string(), true)?;
        }
        Ok(())
    }

    /// Reads the current bar positions back into a [`Mask`], after checking that every
    /// bar reached its target.
    pub fn current_mask(&self) -> CsuResult<Mask> {
        self.precondition(Self::check_ok)?;

        debug!("Getting bar positions");
        let mut positions = [0.0; NUM_BARS];
        for (i, position) in positions.iter_mut().enumerate() {
            let bar = i + 1;
            *position = self.hal.read_float(CSU_SERVICE, &bar_keyword(bar, "POS"))?;
            let target_mm = self.hal.read_float(CSU_SERVICE, &bar_keyword(bar, "TARG"))?;
            if (*position - target_mm).abs() >= BAR_ON_TARGET_MM {
                return Err(CsuError::BarOffTarget { bar, position_mm: *position, target_mm });
            }
        }

        let name = self.hal.read(CSU_SERVICE, "MASKNAME")?;
        let mask = MaskGeometryBuilder::from_bar_positions(name.trim(), &positions);
        self.precondition(Self::check_ok)?;
        Ok(mask)
    }
}

fn collision_row(status: &str) -> Option<u32> {
    let re = Regex::new(COLLISION_RE).ok()?;
    re.captures(status)?.get(1)?.as_str().parse().ok()
}
