//! Start/stop a managed database server and wait for it to settle
//!
//! The HTTP calls live behind [`ServerControl`]; this module owns the state
//! checks and the polling loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const FLEXIBLE_SERVER_API_VERSION: &str = "2020-02-14-preview";

/// Status codes accepted for a power request
const ACCEPTED_STATUS: [u16; 2] = [200, 202];

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("action can only be start or stop, got '{0}'")]
    UnknownAction(String),

    #[error("current state is {current} but server {server} should be {expected}")]
    UnexpectedState {
        server: String,
        current: String,
        expected: String,
    },

    #[error("request to {action} server {server} was rejected with status {status}")]
    RequestRejected {
        server: String,
        action: PowerAction,
        status: u16,
    },

    #[error("server {server} did not reach {desired} after {polls} polls")]
    TimedOut {
        server: String,
        desired: String,
        polls: usize,
    },

    #[error("server control failed: {0}")]
    Control(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
}

impl PowerAction {
    /// State the server must be in before the action is sent
    pub fn expected_state(self) -> &'static str {
        match self {
            PowerAction::Start => "Stopped",
            PowerAction::Stop => "Ready",
        }
    }

    /// State the server reaches once the action completes
    pub fn desired_state(self) -> &'static str {
        match self {
            PowerAction::Start => "Ready",
            PowerAction::Stop => "Stopped",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            other => Err(LifecycleError::UnknownAction(other.to_string())),
        }
    }
}

/// Identity of a flexible server in the management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    pub subscription: String,
    pub resource_group: String,
    pub name: String,
}

impl ServerRef {
    pub fn resource_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DBForPostgreSql/flexibleServers/{}?api-version={}",
            MANAGEMENT_ENDPOINT, self.subscription, self.resource_group, self.name, FLEXIBLE_SERVER_API_VERSION
        )
    }

    pub fn action_url(&self, action: PowerAction) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DBForPostgreSql/flexibleServers/{}/{}?api-version={}",
            MANAGEMENT_ENDPOINT, self.subscription, self.resource_group, self.name, action, FLEXIBLE_SERVER_API_VERSION
        )
    }
}

/// What to do given the server's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    AlreadyInState,
    Proceed,
}

pub fn plan(server: &str, action: PowerAction, current: &str) -> Result<Transition, LifecycleError> {
    if current == action.desired_state() {
        Ok(Transition::AlreadyInState)
    } else if current == action.expected_state() {
        Ok(Transition::Proceed)
    } else {
        Err(LifecycleError::UnexpectedState {
            server: server.to_string(),
            current: current.to_string(),
            expected: action.expected_state().to_string(),
        })
    }
}

/// Collaborator that talks to the server lifecycle endpoint
pub trait ServerControl {
    fn server(&self) -> &ServerRef;

    /// Current `properties.state` of the server
    fn current_state(&mut self) -> anyhow::Result<String>;

    /// Send the power action, returning the HTTP status code
    fn request(&mut self, action: PowerAction) -> anyhow::Result<u16>;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Blocks the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyInState,
    Reached { polls: usize },
}

/// Drives one power action to completion
#[derive(Debug, Clone)]
pub struct PowerCycle<S: Sleeper = ThreadSleeper> {
    pub poll_interval: Duration,
    /// Give up after this many status checks; `None` waits indefinitely
    pub max_polls: Option<usize>,
    sleeper: S,
}

impl PowerCycle<ThreadSleeper> {
    pub fn new(poll_interval: Duration) -> Self {
        PowerCycle {
            poll_interval,
            max_polls: None,
            sleeper: ThreadSleeper,
        }
    }
}

impl Default for PowerCycle<ThreadSleeper> {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl<S: Sleeper> PowerCycle<S> {
    pub fn with_sleeper(poll_interval: Duration, sleeper: S) -> Self {
        PowerCycle {
            poll_interval,
            max_polls: None,
            sleeper,
        }
    }

    pub fn max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    pub fn run<C: ServerControl>(
        &mut self,
        control: &mut C,
        action: PowerAction,
    ) -> Result<Outcome, LifecycleError> {
        let server = control.server().name.clone();
        let desired = action.desired_state();
        let mut current = control.current_state()?;

        if plan(&server, action, &current)? == Transition::AlreadyInState {
            tracing::info!(server = %server, state = %desired, "server already in desired state");
            return Ok(Outcome::AlreadyInState);
        }

        tracing::info!(server = %server, action = %action, "sending power request");
        let status = control.request(action)?;
        if !ACCEPTED_STATUS.contains(&status) {
            return Err(LifecycleError::RequestRejected {
                server,
                action,
                status,
            });
        }

        let mut polls = 0;
        while current != desired {
            if self.max_polls.is_some_and(|max| polls >= max) {
                return Err(LifecycleError::TimedOut {
                    server,
                    desired: desired.to_string(),
                    polls,
                });
            }
            tracing::info!(
                server = %server,
                wait_secs = self.poll_interval.as_secs(),
                "waiting before checking server state"
            );
            self.sleeper.sleep(self.poll_interval);
            current = control.current_state()?;
            polls += 1;
            tracing::info!(server = %server, state = %current, "polled server state");
        }

        tracing::info!(server = %server, state = %desired, polls, "server reached desired state");
        Ok(Outcome::Reached { polls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeServer {
        server: ServerRef,
        states: Vec<&'static str>,
        status: u16,
        requests: Vec<PowerAction>,
    }

    impl FakeServer {
        fn new(states: Vec<&'static str>, status: u16) -> Self {
            FakeServer {
                server: ServerRef {
                    subscription: "sub".to_string(),
                    resource_group: "rg".to_string(),
                    name: "pg1".to_string(),
                },
                states,
                status,
                requests: Vec::new(),
            }
        }
    }

    impl ServerControl for FakeServer {
        fn server(&self) -> &ServerRef {
            &self.server
        }

        fn current_state(&mut self) -> anyhow::Result<String> {
            let state = if self.states.len() > 1 {
                self.states.remove(0)
            } else {
                self.states[0]
            };
            Ok(state.to_string())
        }

        fn request(&mut self, action: PowerAction) -> anyhow::Result<u16> {
            self.requests.push(action);
            Ok(self.status)
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        slept: Vec<Duration>,
    }

    impl Sleeper for &mut CountingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }

    #[test]
    fn test_action_states() {
        assert_eq!("start".parse::<PowerAction>().unwrap(), PowerAction::Start);
        assert_eq!(PowerAction::Start.expected_state(), "Stopped");
        assert_eq!(PowerAction::Start.desired_state(), "Ready");
        assert_eq!(PowerAction::Stop.expected_state(), "Ready");
        assert_eq!(PowerAction::Stop.desired_state(), "Stopped");
        assert!(matches!(
            "restart".parse::<PowerAction>(),
            Err(LifecycleError::UnknownAction(a)) if a == "restart"
        ));
    }

    #[test]
    fn test_plan() {
        assert_eq!(plan("pg1", PowerAction::Start, "Ready").unwrap(), Transition::AlreadyInState);
        assert_eq!(plan("pg1", PowerAction::Start, "Stopped").unwrap(), Transition::Proceed);
        assert!(matches!(
            plan("pg1", PowerAction::Stop, "Starting"),
            Err(LifecycleError::UnexpectedState { current, expected, .. })
                if current == "Starting" && expected == "Ready"
        ));
    }

    #[test]
    fn test_urls() {
        let server = FakeServer::new(vec!["Ready"], 200).server;
        assert_eq!(
            server.action_url(PowerAction::Stop),
            "https://management.azure.com/subscriptions/sub/resourceGroups/rg/providers/Microsoft.DBForPostgreSql/flexibleServers/pg1/stop?api-version=2020-02-14-preview"
        );
        assert!(server.resource_url().ends_with("/flexibleServers/pg1?api-version=2020-02-14-preview"));
    }

    #[test]
    fn test_run_polls_until_desired() {
        let mut server = FakeServer::new(vec!["Stopped", "Starting", "Starting", "Ready"], 202);
        let mut sleeper = CountingSleeper::default();

        let outcome = PowerCycle::with_sleeper(Duration::from_secs(30), &mut sleeper)
            .run(&mut server, PowerAction::Start)
            .unwrap();

        assert_eq!(outcome, Outcome::Reached { polls: 3 });
        assert_eq!(server.requests, vec![PowerAction::Start]);
        assert_eq!(sleeper.slept, vec![Duration::from_secs(30); 3]);
    }

    #[test]
    fn test_run_already_in_state() {
        let mut server = FakeServer::new(vec!["Stopped"], 200);
        let mut sleeper = CountingSleeper::default();

        let outcome = PowerCycle::with_sleeper(Duration::from_secs(1), &mut sleeper)
            .run(&mut server, PowerAction::Stop)
            .unwrap();

        assert_eq!(outcome, Outcome::AlreadyInState);
        assert!(server.requests.is_empty());
    }

    #[test]
    fn test_run_unexpected_state() {
        let mut server = FakeServer::new(vec!["Updating"], 200);
        let mut sleeper = CountingSleeper::default();

        let err = PowerCycle::with_sleeper(Duration::from_secs(1), &mut sleeper)
            .run(&mut server, PowerAction::Start)
            .unwrap_err();

        assert!(matches!(err, LifecycleError::UnexpectedState { .. }));
        assert!(server.requests.is_empty());
    }

    #[test]
    fn test_run_rejected() {
        let mut server = FakeServer::new(vec!["Ready"], 409);
        let mut sleeper = CountingSleeper::default();

        let err = PowerCycle::with_sleeper(Duration::from_secs(1), &mut sleeper)
            .run(&mut server, PowerAction::Stop)
            .unwrap_err();

        assert!(matches!(err, LifecycleError::RequestRejected { status: 409, .. }));
    }

    #[test]
    fn test_run_times_out() {
        let mut server = FakeServer::new(vec!["Ready", "Stopping"], 200);
        let mut sleeper = CountingSleeper::default();

        let err = PowerCycle::with_sleeper(Duration::from_secs(1), &mut sleeper)
            .max_polls(2)
            .run(&mut server, PowerAction::Stop)
            .unwrap_err();

        assert!(matches!(err, LifecycleError::TimedOut { polls: 2, .. }));
        assert_eq!(sleeper.slept.len(), 2);
    }
}
