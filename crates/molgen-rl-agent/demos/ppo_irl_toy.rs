//! Example: PPO (or REINFORCE) with a reward learned from demonstrations
//!
//! Run with an optional JSON config path:
//! `cargo run --example ppo_irl_toy -- config.json`

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use molgen_rl_agent::prelude::*;
use molgen_rl_agent::{
    GathererConfig, MonteCarloTreeSearch, ParallelGatherer, PolicyAlgorithm, PolicyLearner,
    RewardLearner,
};
use molgen_rl_core::{
    InMemoryDemonstrations, RewardOracle, Snapshot, TrackedEnvironment, ValidityOracle,
};
use molgen_rl_env::{SequenceEnv, SequenceEnvConfig, SmilesSyntaxOracle};

const DEMONSTRATIONS: &[&str] = &[
    "CCO", "CC(=O)O", "c1ccccc1", "CCN(CC)CC", "CC(C)O", "OCCO", "C1CCCCC1", "CC(=O)OC",
    "NCCO", "CCOC(=O)C",
];

/// Fraction of carbon atoms; stands in for a real property oracle.
#[allow(clippy::cast_precision_loss)]
fn carbon_fraction(sequences: &[String]) -> Result<Vec<f64>> {
    Ok(sequences
        .iter()
        .map(|s| {
            let atoms = s.chars().filter(char::is_ascii_alphabetic).count().max(1);
            s.chars().filter(|c| matches!(c, 'C' | 'c')).count() as f64 / atoms as f64
        })
        .collect())
}

fn default_config() -> TrainingConfig {
    TrainingConfig {
        gatherer: GathererConfig {
            workers: 2,
            ..GathererConfig::default()
        },
        trainer: TrainerConfig {
            n_episodes: 200,
            ..TrainerConfig::default()
        },
        ..TrainingConfig::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TrainingConfig::load(path).await?,
        None => default_config(),
    };
    config.validate()?;

    let vocab = Arc::new(Vocabulary::smiles()?);
    let mut rng = StdRng::seed_from_u64(config.agent.seed);

    // Reward network, learned or fixed
    let reward_net = MlpScalarNet::new(vocab.len(), &config.reward_net, &mut rng);
    let (reward_view, irl): (Snapshot<MlpScalarNet>, Option<Box<dyn RewardLearner>>) = if config.use_irl {
        let demos = InMemoryDemonstrations::new(&vocab, DEMONSTRATIONS)?;
        let irl = GuidedRewardLearningIrl::new(
            config.irl.clone(),
            reward_net,
            &config.reward_optimizer,
            Arc::clone(&vocab),
            Box::new(demos),
            StdRng::seed_from_u64(config.agent.seed.wrapping_add(1)),
        )?;
        let view = irl.subscribe();
        let irl: Box<dyn RewardLearner> = Box::new(irl);
        (view, Some(irl))
    } else {
        (Snapshot::fixed(reward_net), None)
    };

    // Policy learner
    let policy = MlpPolicy::new(vocab.len(), &config.policy_net, &mut rng);
    let (policy_view, learner): (Snapshot<MlpPolicy>, Box<dyn PolicyLearner>) = match config.algorithm {
        PolicyAlgorithm::Reinforce => {
            let learner = Reinforce::new(
                config.reinforce.clone(),
                policy,
                &config.policy_optimizer,
                Arc::clone(&vocab),
            )?;
            (learner.subscribe(), Box::new(learner) as Box<dyn PolicyLearner>)
        }
        PolicyAlgorithm::Ppo => {
            let critic = MlpScalarNet::new(vocab.len(), &config.critic_net, &mut rng);
            let learner = Ppo::new(
                config.ppo.clone(),
                policy,
                critic,
                &config.policy_optimizer,
                &config.critic_optimizer,
                Arc::clone(&vocab),
            )?;
            (learner.subscribe(), Box::new(learner) as Box<dyn PolicyLearner>)
        }
    };

    let validity: Arc<dyn ValidityOracle> = Arc::new(SmilesSyntaxOracle::new(Arc::clone(&vocab)));
    let expert: Arc<dyn RewardOracle> = Arc::new(carbon_fraction);
    let seed = config.agent.seed;

    let mut gatherer = ParallelGatherer::spawn(&config.gatherer, |worker| {
        let worker_seed = seed.wrapping_add(100 + worker as u64);
        let mut reward = RewardFunction::new(
            &config.reward,
            Arc::clone(&vocab),
            reward_view.clone(),
            Arc::clone(&validity),
        )
        .with_expert(Arc::clone(&expert));
        if config.reward.use_search {
            let rollout_agent = PolicyAgent::new(
                policy_view.clone(),
                SequenceEncoder::new(Arc::clone(&vocab), config.mcts.max_len),
                ProbabilityActionSelector::new(Arc::clone(&vocab), worker_seed ^ 0x5eed),
            );
            reward = reward.with_search(MonteCarloTreeSearch::new(config.mcts.clone(), rollout_agent));
        }

        let env = SequenceEnv::new(
            SequenceEnvConfig {
                max_len: config.agent.max_len,
            },
            Arc::clone(&vocab),
            Box::new(reward),
        )?;
        let agent = PolicyAgent::new(
            policy_view.clone(),
            SequenceEncoder::new(Arc::clone(&vocab), config.agent.max_len),
            ProbabilityActionSelector::new(Arc::clone(&vocab), worker_seed),
        );
        Ok(ExperienceSource::new(TrackedEnvironment::new(env), agent))
    })?;

    let mut trainer = Trainer::new(config.trainer.clone(), learner)?;
    if let Some(irl) = irl {
        trainer = trainer.with_reward_learner(irl);
    }
    let report = trainer.run_parallel(&mut gatherer).await?;

    info!(
        episodes = report.episodes,
        updates = report.updates,
        skipped = report.skipped_updates,
        mean_reward = ?report.mean_reward,
        best_mean_reward = ?report.best_mean_reward,
        best_episode = ?report.best_episode,
        "run complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
