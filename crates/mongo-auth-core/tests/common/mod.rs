//! Shared scripted mechanism for exercising the conversation driver.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mongo_auth_core::connection::ConnectionDescription;
use mongo_auth_core::error::{CommandError, Result};
use mongo_auth_core::{SaslConversation, SaslMechanism, SaslStep, StepTransition};

/// One scripted step transition.
#[derive(Clone, Debug)]
pub struct Transition {
    /// When set, the step asserts the server payload it received.
    pub expect_input: Option<Option<Vec<u8>>>,
    /// Bytes to hand back to the driver; `None` is a local transition.
    pub to_send: Option<Vec<u8>>,
}

impl Transition {
    /// Send bytes, asserting the input that triggered the step.
    pub fn send(expect_input: Option<Vec<u8>>, bytes: Vec<u8>) -> Self {
        Self {
            expect_input: Some(expect_input),
            to_send: Some(bytes),
        }
    }

    /// Send bytes without asserting the input.
    pub fn send_any(bytes: Vec<u8>) -> Self {
        Self {
            expect_input: None,
            to_send: Some(bytes),
        }
    }

    /// Local transition (no round trip), asserting the input.
    pub fn local(expect_input: Option<Vec<u8>>) -> Self {
        Self {
            expect_input: Some(expect_input),
            to_send: None,
        }
    }
}

/// A step chain that replays scripted transitions one at a time.
pub struct ChainStep {
    transitions: VecDeque<Transition>,
}

impl ChainStep {
    pub fn new(transitions: Vec<Transition>) -> Box<dyn SaslStep> {
        Box::new(Self {
            transitions: transitions.into(),
        })
    }
}

#[async_trait]
impl SaslStep for ChainStep {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        let mut chain = self;
        let transition = chain
            .transitions
            .pop_front()
            .expect("step executed past the end of its script");
        if let Some(expected) = transition.expect_input {
            assert_eq!(
                server_payload.map(<[u8]>::to_vec),
                expected,
                "step received unexpected server payload"
            );
        }
        let next = if chain.transitions.is_empty() {
            None
        } else {
            Some(chain as Box<dyn SaslStep>)
        };
        Ok(StepTransition {
            to_send: transition.to_send,
            next,
        })
    }
}

/// Records its label into a shared log when dropped.
pub struct DropProbe {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl DropProbe {
    pub fn new(label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self { label, log }
    }
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(self.label);
    }
}

/// A fully scripted mechanism named `TEST`.
#[derive(Debug)]
pub struct TestMechanism {
    script: Vec<Transition>,
    speculative: bool,
    recovery_script: Mutex<Option<Vec<Transition>>>,
    disposal_labels: Vec<&'static str>,
    disposal_log: Arc<Mutex<Vec<&'static str>>>,
    reauth_invalidations: Arc<AtomicUsize>,
}

impl TestMechanism {
    pub fn new(script: Vec<Transition>) -> Self {
        Self {
            script,
            speculative: false,
            recovery_script: Mutex::new(None),
            disposal_labels: Vec::new(),
            disposal_log: Arc::new(Mutex::new(Vec::new())),
            reauth_invalidations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Also serve the script as a speculative first step.
    pub fn speculative(mut self) -> Self {
        self.speculative = true;
        self
    }

    /// Script a replacement chain for the re-authentication recovery path.
    pub fn with_recovery(self, script: Vec<Transition>) -> Self {
        *self.recovery_script.lock().unwrap() = Some(script);
        self
    }

    /// Register drop probes on the conversation during `initialize`.
    pub fn with_disposal_probes(
        mut self,
        labels: Vec<&'static str>,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> Self {
        self.disposal_labels = labels;
        self.disposal_log = log;
        self
    }

    /// How many times the re-authentication hook fired.
    pub fn reauth_invalidations(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reauth_invalidations)
    }
}

#[async_trait]
impl SaslMechanism for TestMechanism {
    fn name(&self) -> &'static str {
        "TEST"
    }

    fn database_name(&self) -> &str {
        "admin"
    }

    async fn initialize(
        &self,
        conversation: &mut SaslConversation,
        _description: &ConnectionDescription,
    ) -> Result<Box<dyn SaslStep>> {
        for label in &self.disposal_labels {
            conversation.register_for_disposal(DropProbe::new(label, Arc::clone(&self.disposal_log)));
        }
        Ok(ChainStep::new(self.script.clone()))
    }

    fn create_speculative_step(&self) -> Option<Box<dyn SaslStep>> {
        self.speculative.then(|| ChainStep::new(self.script.clone()))
    }

    fn on_reauthentication_required(&self) {
        self.reauth_invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn try_handle_authentication_error(
        &self,
        error: &CommandError,
        _conversation: &mut SaslConversation,
        _description: &ConnectionDescription,
    ) -> Result<Option<Box<dyn SaslStep>>> {
        if !error.is_reauthentication_required() {
            return Ok(None);
        }
        match self.recovery_script.lock().unwrap().take() {
            Some(script) => {
                self.on_reauthentication_required();
                Ok(Some(ChainStep::new(script)))
            }
            None => Ok(None),
        }
    }
}
