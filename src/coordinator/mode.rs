use crate::prelude::*;

use crate::esy::telemetry;

use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u8 = 2;

#[derive(Clone, Debug)]
struct Pending {
    name: String,
    code: u16,
    retries: u8,
    deadline: Instant,
}

/// What to do when the confirmation timer fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Re-send the same write and keep waiting.
    Resend(u16),
    /// Give up; display falls back to this mode (if any was ever confirmed).
    Revert(Option<String>),
}

/// Mode-change confirmation tracker.
///
/// A request switches the displayed mode optimistically and arms a timer.
/// The device does not acknowledge writes directly; confirmation is the
/// requested mode showing up in telemetry. Timeouts re-send a bounded
/// number of times, then revert the display to the last mode telemetry
/// actually reported. All transitions are synchronous; the owner drives
/// the timer.
#[derive(Debug)]
pub struct ModeSelect {
    pending: Option<Pending>,
    confirmed: Option<String>,
    displayed: Option<String>,
    timeout: Duration,
    max_retries: u8,
}

impl Default for ModeSelect {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

impl ModeSelect {
    pub fn new(timeout: Duration, max_retries: u8) -> Self {
        Self {
            pending: None,
            confirmed: None,
            displayed: None,
            timeout,
            max_retries,
        }
    }

    /// Validates and registers a mode-change request, returning the wire
    /// code to write. A request while another is pending supersedes it;
    /// the old timer is dropped.
    pub fn request(&mut self, name: &str, now: Instant) -> Result<u16> {
        let code = telemetry::mode_code(name).ok_or_else(|| {
            anyhow!(
                "invalid mode request {:?}: must be one of {:?}",
                name,
                telemetry::SELECTABLE_MODES
            )
        })?;

        if self.pending.is_none() && self.confirmed.as_deref() == Some(name) {
            bail!("mode {:?} is already active", name);
        }

        if let Some(old) = &self.pending {
            info!("superseding pending mode change to {:?}", old.name);
        }

        self.pending = Some(Pending {
            name: name.to_string(),
            code,
            retries: 0,
            deadline: now + self.timeout,
        });
        self.displayed = Some(name.to_string());

        Ok(code)
    }

    /// Feeds in the mode telemetry currently reports. Returns true when
    /// this observation confirms the pending request.
    pub fn observe(&mut self, reported: &str) -> bool {
        self.confirmed = Some(reported.to_string());

        match &self.pending {
            Some(p) if p.name == reported => {
                self.displayed = Some(reported.to_string());
                self.pending = None;
                true
            }
            Some(_) => false, // still waiting; keep the optimistic display
            None => {
                self.displayed = Some(reported.to_string());
                false
            }
        }
    }

    /// Deadline of the outstanding request, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn on_timeout(&mut self, now: Instant) -> Option<TimeoutAction> {
        let pending = self.pending.as_mut()?;
        if now < pending.deadline {
            return None;
        }

        if pending.retries < self.max_retries {
            pending.retries += 1;
            pending.deadline = now + self.timeout;
            Some(TimeoutAction::Resend(pending.code))
        } else {
            self.pending = None;
            self.displayed = self.confirmed.clone();
            Some(TimeoutAction::Revert(self.confirmed.clone()))
        }
    }

    /// Publishing the write failed; revert immediately, no retries.
    pub fn dispatch_failed(&mut self) -> Option<String> {
        self.pending = None;
        self.displayed = self.confirmed.clone();
        self.confirmed.clone()
    }

    /// Mode name to show consumers: the optimistic pending name while a
    /// request is in flight, otherwise whatever telemetry last reported.
    pub fn displayed(&self) -> Option<&str> {
        self.displayed.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Target of the outstanding request, for diagnostics.
    pub fn pending_target(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.name.as_str())
    }

    pub fn retries(&self) -> u8 {
        self.pending.as_ref().map(|p| p.retries).unwrap_or(0)
    }

    /// Last mode actually corroborated by telemetry.
    pub fn confirmed(&self) -> Option<&str> {
        self.confirmed.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ModeSelect {
        ModeSelect::default()
    }

    #[test]
    fn request_validates_mode_name() {
        let mut m = machine();
        let now = Instant::now();

        assert_eq!(m.request("Emergency Mode", now).unwrap(), 4);
        assert!(m.is_pending());
        assert_eq!(m.displayed(), Some("Emergency Mode"));

        let mut m = machine();
        assert!(m.request("Grid Priority Mode", now).is_err());
        assert!(!m.is_pending());
        assert_eq!(m.displayed(), None);
    }

    #[test]
    fn requesting_the_active_mode_is_rejected() {
        let mut m = machine();
        let now = Instant::now();
        m.observe("Regular Mode");

        assert!(m.request("Regular Mode", now).is_err());
        assert!(!m.is_pending());

        // but a pending request may be superseded back to the active mode
        m.request("Emergency Mode", now).unwrap();
        assert!(m.request("Regular Mode", now).is_ok());
    }

    #[test]
    fn telemetry_confirms_pending_request() {
        let mut m = machine();
        let now = Instant::now();
        m.request("Regular Mode", now).unwrap();

        // some other mode arrives first: not a confirmation
        assert!(!m.observe("Emergency Mode"));
        assert!(m.is_pending());
        assert_eq!(m.displayed(), Some("Regular Mode"));

        assert!(m.observe("Regular Mode"));
        assert!(!m.is_pending());
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn timeout_retries_then_reverts() {
        let mut m = machine();
        let now = Instant::now();
        m.observe("Regular Mode");
        m.request("Emergency Mode", now).unwrap();

        let t1 = m.deadline().unwrap();
        assert_eq!(m.on_timeout(t1), Some(TimeoutAction::Resend(4)));
        assert!(m.is_pending());

        let t2 = m.deadline().unwrap();
        assert!(t2 > t1);
        assert_eq!(m.on_timeout(t2), Some(TimeoutAction::Resend(4)));

        let t3 = m.deadline().unwrap();
        assert_eq!(
            m.on_timeout(t3),
            Some(TimeoutAction::Revert(Some("Regular Mode".to_string())))
        );
        assert!(!m.is_pending());
        assert_eq!(m.displayed(), Some("Regular Mode"));
    }

    #[test]
    fn early_timer_fire_is_ignored() {
        let mut m = machine();
        let now = Instant::now();
        m.request("Emergency Mode", now).unwrap();

        assert_eq!(m.on_timeout(now), None);
        assert!(m.is_pending());
    }

    #[test]
    fn new_request_supersedes_pending_one() {
        let mut m = machine();
        let now = Instant::now();
        m.request("Emergency Mode", now).unwrap();
        m.request("Regular Mode", now).unwrap();

        // the old request can no longer confirm
        assert!(!m.observe("Emergency Mode"));
        assert!(m.is_pending());
        assert!(m.observe("Regular Mode"));
    }

    #[test]
    fn dispatch_failure_reverts_immediately() {
        let mut m = machine();
        let now = Instant::now();
        m.observe("Regular Mode");
        m.request("Battery Energy Management", now).unwrap();
        assert_eq!(m.displayed(), Some("Battery Energy Management"));

        assert_eq!(m.dispatch_failed(), Some("Regular Mode".to_string()));
        assert!(!m.is_pending());
        assert_eq!(m.displayed(), Some("Regular Mode"));
    }

    #[test]
    fn revert_with_no_confirmed_mode() {
        let mut m = ModeSelect::new(DEFAULT_TIMEOUT, 0);
        let now = Instant::now();
        m.request("Regular Mode", now).unwrap();

        let t = m.deadline().unwrap();
        assert_eq!(m.on_timeout(t), Some(TimeoutAction::Revert(None)));
        assert_eq!(m.displayed(), None);
    }

    #[test]
    fn unconfirmed_observation_tracks_display_when_idle() {
        let mut m = machine();
        assert!(!m.observe("Electricity Sell Mode"));
        assert_eq!(m.displayed(), Some("Electricity Sell Mode"));
    }
}
