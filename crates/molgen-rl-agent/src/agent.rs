//! Policy-driven agent: inference over a parameter snapshot

use std::sync::Arc;

use ndarray::Array1;

use molgen_rl_core::{
    Agent, Memory, PolicyNetwork, Result, SequenceEncoder, SequenceState, Snapshot, Token,
};

use crate::registry::StateActionProbRegistry;
use crate::selector::{validate_distribution, ProbabilityActionSelector};

/// Agent that samples tokens from a policy network.
///
/// Reads the network through a [`Snapshot`], so parameter updates published
/// by the trainer take effect on the next call. When a registry is attached
/// every selection is recorded into it; search rollouts go through
/// [`PolicyAgent::act_with`] without recording.
pub struct PolicyAgent<P> {
    policy: Snapshot<P>,
    encoder: SequenceEncoder,
    selector: ProbabilityActionSelector,
    registry: Option<StateActionProbRegistry>,
}

impl<P: PolicyNetwork> PolicyAgent<P> {
    /// Create a non-recording agent
    pub fn new(
        policy: Snapshot<P>,
        encoder: SequenceEncoder,
        selector: ProbabilityActionSelector,
    ) -> Self {
        Self {
            policy,
            encoder,
            selector,
            registry: None,
        }
    }

    /// Attach a probability registry if none is attached yet
    #[must_use]
    pub fn with_registry(mut self) -> Self {
        self.registry.get_or_insert_with(StateActionProbRegistry::new);
        self
    }

    /// The attached registry
    #[must_use]
    pub fn registry(&self) -> Option<&StateActionProbRegistry> {
        self.registry.as_ref()
    }

    /// The attached registry, mutably
    pub fn registry_mut(&mut self) -> Option<&mut StateActionProbRegistry> {
        self.registry.as_mut()
    }

    /// The policy parameters currently in use
    #[must_use]
    pub fn policy(&self) -> Arc<P> {
        self.policy.current()
    }

    /// Switch to another parameter snapshot
    pub fn set_policy(&mut self, policy: Snapshot<P>) {
        self.policy = policy;
    }

    /// The state encoder
    #[must_use]
    pub fn encoder(&self) -> &SequenceEncoder {
        &self.encoder
    }

    /// Next-token probabilities for `state` and the memory for the next call
    pub fn distribution(
        &self,
        state: &SequenceState,
        memory: Option<&Memory>,
    ) -> Result<(Array1<f64>, Option<Memory>)> {
        let encoded = self.encoder.encode_state(state)?;
        let policy = self.policy.current();
        let output = policy.forward(&encoded, memory)?;
        let probs = output.distribution.into_probabilities();
        validate_distribution(&probs, self.encoder.vocab().len())?;
        Ok((probs, output.memory))
    }

    /// Select an action, recording its probability only when `record` is set
    /// and a registry is attached.
    pub fn act_with(
        &mut self,
        state: &SequenceState,
        memory: Option<Memory>,
        record: bool,
    ) -> Result<(Token, Option<Memory>)> {
        let (probs, memory) = self.distribution(state, memory.as_ref())?;
        let (action, prob) = self.selector.select(&probs)?;

        if record {
            if let Some(registry) = self.registry.as_mut() {
                registry.add(state, action, prob);
            }
        }
        Ok((action, memory))
    }
}

impl<P: PolicyNetwork> Agent for PolicyAgent<P> {
    fn initial_memory(&self) -> Option<Memory> {
        self.policy.current().initial_memory()
    }

    fn act(
        &mut self,
        state: &SequenceState,
        memory: Option<Memory>,
    ) -> Result<(Token, Option<Memory>)> {
        self.act_with(state, memory, true)
    }
}
