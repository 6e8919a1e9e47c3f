//! End-to-end training runs over the sequence environment

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use molgen_rl_agent::prelude::*;
use molgen_rl_agent::{GatherUnit, GathererConfig, Init, IrlConfig, ParallelGatherer, RewardConfig};
use molgen_rl_core::network::softmax;
use molgen_rl_core::{
    AgentConfig, InMemoryDemonstrations, Parameterized, RLError, Snapshot, TrackedEnvironment,
};
use molgen_rl_env::{SequenceEnv, SequenceEnvConfig, SmilesSyntaxOracle};

fn toy_vocab() -> Arc<Vocabulary> {
    Arc::new(Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap())
}

fn linear_zero_policy(vocab: &Vocabulary) -> MlpPolicy {
    let config = MlpConfig {
        hidden_dims: vec![],
        context: 2,
        init: Init::Zeros,
    };
    MlpPolicy::new(vocab.len(), &config, &mut StdRng::seed_from_u64(0))
}

fn target_reward(state: &SequenceState, terminal: bool) -> Result<f64> {
    Ok(if terminal && state.key() == "AB>" { 1.0 } else { 0.0 })
}

fn toy_source(
    vocab: &Arc<Vocabulary>,
    policy: Snapshot<MlpPolicy>,
    seed: u64,
) -> ExperienceSource<TrackedEnvironment<SequenceEnv>, MlpPolicy> {
    let env = SequenceEnv::new(
        SequenceEnvConfig { max_len: 3 },
        Arc::clone(vocab),
        Box::new(target_reward),
    )
    .unwrap();
    let agent = PolicyAgent::new(
        policy,
        SequenceEncoder::new(Arc::clone(vocab), 3),
        ProbabilityActionSelector::new(Arc::clone(vocab), seed),
    );
    ExperienceSource::new(TrackedEnvironment::new(env), agent)
}

fn target_probability(vocab: &Arc<Vocabulary>, policy: &MlpPolicy) -> f64 {
    let encoder = SequenceEncoder::new(Arc::clone(vocab), 3);
    let states = [
        SequenceState::from(""),
        SequenceState::from("A"),
        SequenceState::from("AB"),
    ];
    let logits = policy.logits(&encoder.encode_states(&states).unwrap()).unwrap();
    ['A', 'B', '>']
        .iter()
        .enumerate()
        .map(|(row, &token)| {
            let probs = softmax(&logits.row(row).to_owned());
            probs[vocab.index_of(token).unwrap()]
        })
        .product()
}

fn reinforce_learner(vocab: &Arc<Vocabulary>) -> Reinforce<MlpPolicy> {
    let config = ReinforceConfig {
        base: AgentConfig {
            gamma: 1.0,
            ..AgentConfig::default()
        },
        max_grad_norm: None,
    };
    Reinforce::new(
        config,
        linear_zero_policy(vocab),
        &OptimizerConfig::Sgd {
            lr: 1.0,
            weight_decay: 0.0,
        },
        Arc::clone(vocab),
    )
    .unwrap()
}

fn trainer_config(n_episodes: usize) -> TrainerConfig {
    TrainerConfig {
        base: AgentConfig {
            episodes_to_train: 10,
            ..AgentConfig::default()
        },
        n_episodes,
        reward_window: 50,
        restore_best: true,
    }
}

#[tokio::test]
async fn reinforce_learns_the_rewarded_sequence() {
    let vocab = toy_vocab();
    let learner = reinforce_learner(&vocab);
    let view = learner.subscribe();
    let before = target_probability(&vocab, &view.current());
    assert!((before - 1.0 / 27.0).abs() < 1e-12);

    let mut source = toy_source(&vocab, learner.subscribe(), 7);
    // Keep the final parameters; an early lucky window could otherwise
    // roll the policy back to its starting point.
    let config = TrainerConfig {
        restore_best: false,
        ..trainer_config(400)
    };
    let mut trainer = Trainer::new(config, Box::new(learner)).unwrap();
    let report = trainer.run(&mut source).await.unwrap();

    assert_eq!(report.episodes, 400);
    assert_eq!(report.updates, 40);
    assert_eq!(report.skipped_updates, 0);
    assert!(view.has_changed());

    let episode = source.env().episode_info().unwrap();
    assert!(episode.end_time.is_some());
    assert!((1..=3).contains(&episode.steps));
    assert_eq!(Some(episode.total_reward), report.total_rewards.last().copied());

    let after = target_probability(&vocab, &view.current());
    assert!(after > before, "P(AB>) went from {before} to {after}");

    assert!(trainer.restore_best().unwrap());
    let best = trainer.best_weights().unwrap();
    assert_eq!(report.best_episode, Some(best.episode));
    assert_eq!(view.current().parameters(), best.policy.0[0].as_slice());
}

#[tokio::test]
async fn parallel_workers_feed_one_trainer() {
    let vocab = toy_vocab();
    let learner = reinforce_learner(&vocab);
    let snapshot = learner.subscribe();

    let config = GathererConfig {
        workers: 3,
        queue_capacity: None,
        queue_timeout_secs: 10,
    };
    let mut gatherer = ParallelGatherer::spawn(&config, |worker| {
        Ok(toy_source(&vocab, snapshot.clone(), 100 + worker as u64))
    })
    .unwrap();
    assert_eq!(gatherer.workers(), 3);

    let mut trainer = Trainer::new(trainer_config(60), Box::new(learner)).unwrap();
    let report = trainer.run_parallel(&mut gatherer).await.unwrap();

    assert_eq!(report.episodes, 60);
    assert_eq!(report.total_rewards.len(), report.episodes);
    assert_eq!(report.updates + report.skipped_updates, 6);
    assert!(report
        .total_rewards
        .iter()
        .all(|&r| r.abs() < f64::EPSILON || (r - 1.0).abs() < f64::EPSILON));
}

struct Broken;

#[async_trait::async_trait]
impl Environment for Broken {
    async fn reset(&mut self) -> Result<SequenceState> {
        Ok(SequenceState::default())
    }

    async fn step(&mut self, _action: Token) -> Result<Step> {
        Err(RLError::Environment("simulator crashed".into()))
    }
}

struct Stalled;

#[async_trait::async_trait]
impl Environment for Stalled {
    async fn reset(&mut self) -> Result<SequenceState> {
        Ok(SequenceState::default())
    }

    async fn step(&mut self, _action: Token) -> Result<Step> {
        std::future::pending().await
    }
}

fn agent_for(vocab: &Arc<Vocabulary>, policy: Snapshot<MlpPolicy>) -> PolicyAgent<MlpPolicy> {
    PolicyAgent::new(
        policy,
        SequenceEncoder::new(Arc::clone(vocab), 3),
        ProbabilityActionSelector::new(Arc::clone(vocab), 1),
    )
}

#[tokio::test]
async fn failed_worker_fails_the_run() {
    let vocab = toy_vocab();
    let learner = reinforce_learner(&vocab);
    let snapshot = learner.subscribe();

    let config = GathererConfig {
        workers: 1,
        queue_capacity: None,
        queue_timeout_secs: 10,
    };
    let mut gatherer = ParallelGatherer::spawn(&config, |_| {
        Ok(ExperienceSource::new(Broken, agent_for(&vocab, snapshot.clone())))
    })
    .unwrap();

    let first = gatherer.recv().await.unwrap();
    assert!(matches!(first.unit, GatherUnit::Failed(ref m) if m.contains("simulator crashed")));
    gatherer.shutdown().await;

    let mut gatherer = ParallelGatherer::spawn(&config, |_| {
        Ok(ExperienceSource::new(Broken, agent_for(&vocab, snapshot.clone())))
    })
    .unwrap();
    let mut trainer = Trainer::new(trainer_config(10), Box::new(learner)).unwrap();
    let err = trainer.run_parallel(&mut gatherer).await.unwrap_err();
    assert!(matches!(err, RLError::Worker(_)));
}

#[tokio::test]
async fn stalled_workers_starve_the_queue() {
    let vocab = toy_vocab();
    let learner = reinforce_learner(&vocab);
    let snapshot = learner.subscribe();

    let config = GathererConfig {
        workers: 2,
        queue_capacity: None,
        queue_timeout_secs: 1,
    };
    let mut gatherer = ParallelGatherer::spawn(&config, |_| {
        Ok(ExperienceSource::new(Stalled, agent_for(&vocab, snapshot.clone())))
    })
    .unwrap();

    let mut trainer = Trainer::new(trainer_config(10), Box::new(learner)).unwrap();
    let err = trainer.run_parallel(&mut gatherer).await.unwrap_err();
    assert!(matches!(err, RLError::QueueStarved(_)));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn ppo_with_learned_reward_runs() {
    let vocab = Arc::new(
        Vocabulary::new(vec!['<', 'C', 'O', '(', ')', '1', '>'], '>', Some('<'), None).unwrap(),
    );
    let mut rng = StdRng::seed_from_u64(11);
    let net = MlpConfig {
        hidden_dims: vec![8],
        context: 4,
        init: Init::Xavier,
    };
    let optimizer = OptimizerConfig::default();

    let demos = InMemoryDemonstrations::new(&vocab, &["CCO", "C1CC1", "CC(O)C", "OCCO"]).unwrap();
    let irl = GuidedRewardLearningIrl::new(
        IrlConfig {
            k: 2,
            buffer_batch_size: 4,
            demo_batch_size: 4,
            ..IrlConfig::default()
        },
        MlpScalarNet::new(vocab.len(), &net, &mut rng),
        &optimizer,
        Arc::clone(&vocab),
        Box::new(demos),
        StdRng::seed_from_u64(12),
    )
    .unwrap();

    let reward = RewardFunction::<MlpPolicy, MlpScalarNet>::new(
        &RewardConfig::default(),
        Arc::clone(&vocab),
        irl.subscribe(),
        Arc::new(SmilesSyntaxOracle::new(Arc::clone(&vocab))),
    );

    let ppo = Ppo::new(
        PpoConfig {
            epochs: 2,
            minibatch_size: 8,
            ..PpoConfig::default()
        },
        MlpPolicy::new(vocab.len(), &net, &mut rng),
        MlpScalarNet::new(vocab.len(), &net, &mut rng),
        &optimizer,
        &optimizer,
        Arc::clone(&vocab),
    )
    .unwrap();

    let env = SequenceEnv::new(SequenceEnvConfig { max_len: 8 }, Arc::clone(&vocab), Box::new(reward)).unwrap();
    let agent = PolicyAgent::new(
        ppo.subscribe(),
        SequenceEncoder::new(Arc::clone(&vocab), 8),
        ProbabilityActionSelector::new(Arc::clone(&vocab), 5),
    );
    let mut source = ExperienceSource::new(env, agent);

    let actor_view = ppo.subscribe();
    let reward_view = irl.subscribe();
    let mut trainer = Trainer::new(trainer_config(40), Box::new(ppo))
        .unwrap()
        .with_reward_learner(Box::new(irl));
    let report = trainer.run(&mut source).await.unwrap();

    assert_eq!(report.episodes, 40);
    assert!(report.updates <= 4);
    assert!(report.updates + report.skipped_updates >= 4);
    // The run ends on the parameters saved at the best trailing mean
    let best = trainer.best_weights().unwrap();
    assert_eq!(report.best_mean_reward, Some(best.mean_reward));
    assert_eq!(best.policy.0.len(), 2);
    assert_eq!(actor_view.current().parameters(), best.policy.0[0].as_slice());
    let saved_reward = best.reward.as_ref().unwrap();
    assert_eq!(reward_view.current().parameters(), saved_reward.0[0].as_slice());
    assert!(!report.irl_objectives.is_empty());
    assert!(report.irl_objectives.iter().all(|j| j.is_finite()));
    assert!(report.policy_losses.iter().all(|l| l.is_finite()));
}
