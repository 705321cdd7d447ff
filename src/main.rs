//! Riichi mahjong network CLI
//!
//! Builds the action-value and rank models, runs them on sample input and
//! prints what they produce.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use riichi_brain::{Config, Result};

#[derive(Parser)]
#[command(name = "riichi-brain")]
#[command(about = "Action-value and rank-distribution networks for riichi mahjong", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config
    Init,
    /// Build the configured networks and show their sizes
    Info,
    /// Pick actions for random observations and masks
    Act {
        /// Number of observations
        #[arg(long, default_value = "4")]
        batch: usize,
        /// Seed for observations, masks and sampling
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Directory holding brain and head weights
        #[arg(long)]
        weights: Option<PathBuf>,
    },
    /// Predict final placements from round sequences
    Grp {
        /// JSON file: a list of games, each a list of 7-wide round rows
        input: PathBuf,
        /// Rank model weights
        #[arg(long)]
        weights: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Info => commands::info(&config),
        Commands::Act {
            batch,
            seed,
            weights,
        } => commands::act(&config, batch, seed, weights),
        Commands::Grp { input, weights } => commands::grp(&config, &input, weights),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use std::path::Path;

    use burn::backend::NdArray;
    use burn::module::Module;
    use burn::tensor::{Tensor, TensorData};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use riichi_brain::consts::{ACTION_SPACE, GRP_SIZE, NUM_PLAYERS, NUM_TILES};
    use riichi_brain::model::checkpoint::load_module;
    use riichi_brain::model::{
        mask_from_rows, BrainConfig, BrainV1, BrainV2, DuelingHead, Grp, GrpConfig,
    };
    use riichi_brain::predict::ActionSelector;
    use riichi_brain::{ArchVersion, BrainError};

    type MyBackend = NdArray<f32>;
    type GrpBackend = NdArray<f64>;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to pick the architecture version and sizes", config_path);
        println!("  2. Run 'riichi-brain info' to check the network sizes");
        Ok(())
    }

    pub fn info(config: &Config) -> Result<()> {
        let device = Default::default();
        let version = config.arch_version()?;
        let brain_config = BrainConfig::from_config(&config.brain);

        let (brain_params, norm_layers, in_channels) = match version {
            ArchVersion::V1 => {
                let brain = BrainV1::<MyBackend>::new(&device, &brain_config);
                (
                    brain.num_params(),
                    brain.encoder().norm_layers().len(),
                    brain.encoder().in_channels(),
                )
            }
            ArchVersion::V2 => {
                let brain = BrainV2::<MyBackend>::new(&device, &brain_config);
                (
                    brain.num_params(),
                    brain.encoder().norm_layers().len(),
                    brain.encoder().in_channels(),
                )
            }
        };
        let head = DuelingHead::<MyBackend>::new(&device, version);
        let grp = Grp::<GrpBackend>::new(&device, &GrpConfig::from_config(&config.grp));

        println!("Network Information");
        println!("───────────────────────────────");
        println!("  Version:        {}", version);
        println!("  Oracle:         {}", config.brain.oracle);
        println!("  Input channels: {}", in_channels);
        println!("  Conv blocks:    {} x {}", config.brain.num_blocks, config.brain.conv_channels);
        println!("  Batch norms:    {}", norm_layers);
        println!("  Brain params:   {}", brain_params);
        println!("  Head params:    {} ({} -> {})", head.num_params(), head.input_dim(), head.action_space());
        println!(
            "  Rank model:     {} params ({} GRU layers x {})",
            grp.num_params(),
            config.grp.num_layers,
            config.grp.hidden_size
        );

        Ok(())
    }

    fn random_observation(
        rng: &mut StdRng,
        batch: usize,
        channels: usize,
        device: &<MyBackend as burn::tensor::backend::Backend>::Device,
    ) -> Tensor<MyBackend, 3> {
        let values: Vec<f32> = (0..batch * channels * NUM_TILES).map(|_| rng.gen()).collect();
        Tensor::from_data(TensorData::new(values, [batch, channels, NUM_TILES]), device)
    }

    fn random_mask_rows(rng: &mut StdRng, batch: usize) -> Vec<Vec<bool>> {
        (0..batch)
            .map(|_| {
                let mut row: Vec<bool> = (0..ACTION_SPACE).map(|_| rng.gen_bool(0.3)).collect();
                if !row.iter().any(|&legal| legal) {
                    row[rng.gen_range(0..ACTION_SPACE)] = true;
                }
                row
            })
            .collect()
    }

    pub fn act(config: &Config, batch: usize, seed: u64, weights: Option<PathBuf>) -> Result<()> {
        if batch == 0 {
            return Err(BrainError::InvalidInput("batch must be at least 1".to_string()));
        }
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(seed);

        let version = config.arch_version()?;
        let brain_config = BrainConfig::from_config(&config.brain);
        let selector = ActionSelector::from_config(&config.inference)?;

        let obs = random_observation(&mut rng, batch, version.obs_channels(), &device);
        let invisible = if config.brain.oracle {
            Some(random_observation(&mut rng, batch, version.oracle_obs_channels(), &device))
        } else {
            None
        };
        let rows = random_mask_rows(&mut rng, batch);
        let mask = mask_from_rows::<MyBackend>(&rows, ACTION_SPACE, &device)?;

        let features = match version {
            ArchVersion::V1 => {
                let mut brain = BrainV1::<MyBackend>::new(&device, &brain_config);
                if let Some(dir) = &weights {
                    brain = brain.load(&dir.join("brain"), &device)?;
                }
                brain.forward(obs, invisible)?.mu
            }
            ArchVersion::V2 => {
                let mut brain = BrainV2::<MyBackend>::new(&device, &brain_config);
                if let Some(dir) = &weights {
                    brain = brain.load(&dir.join("brain"), &device)?;
                }
                brain.forward(obs, invisible)?
            }
        };

        let mut head = DuelingHead::<MyBackend>::new(&device, version);
        if let Some(dir) = &weights {
            head = load_module(head, &dir.join("dqn"), &device)?;
        }

        let q = head.forward(features, mask.clone())?;
        let actions = selector.select(q.clone(), mask, &mut rng)?;
        let q_values: Vec<f32> = q.into_data().iter::<f32>().collect();

        println!("{:<6} {:>6} {:>7} {:>10}", "Row", "Legal", "Action", "Q");
        println!("{}", "─".repeat(32));
        for (row, &action) in actions.iter().enumerate() {
            let legal = rows[row].iter().filter(|&&l| l).count();
            println!(
                "{:<6} {:>6} {:>7} {:>10.4}",
                row,
                legal,
                action,
                q_values[row * ACTION_SPACE + action]
            );
        }

        Ok(())
    }

    pub fn grp(config: &Config, input: &Path, weights: Option<PathBuf>) -> Result<()> {
        let device = Default::default();

        let content = std::fs::read_to_string(input)?;
        let games: Vec<Vec<[f32; GRP_SIZE]>> = serde_json::from_str(&content)
            .map_err(|e| BrainError::Parse(format!("{}: {}", input.display(), e)))?;
        log::info!("Loaded {} games from {}", games.len(), input.display());

        let mut model = Grp::<GrpBackend>::new(&device, &GrpConfig::from_config(&config.grp));
        if let Some(path) = &weights {
            model = model.load(path, &device)?;
        }

        let sequences = Grp::<GrpBackend>::sequences_from_rows(&games, &device)?;
        let logits = model.forward(sequences)?;
        let matrix: Vec<f64> = model.calc_matrix(logits)?.into_data().iter::<f64>().collect();

        let cells = NUM_PLAYERS * NUM_PLAYERS;
        for (game, probs) in matrix.chunks(cells).enumerate() {
            println!("\nGame {} ({} rounds)", game, games[game].len());
            println!("{:<8} {:>7} {:>7} {:>7} {:>7}", "Player", "1st", "2nd", "3rd", "4th");
            for (player, row) in probs.chunks(NUM_PLAYERS).enumerate() {
                println!(
                    "{:<8} {:>6.1}% {:>6.1}% {:>6.1}% {:>6.1}%",
                    player,
                    row[0] * 100.0,
                    row[1] * 100.0,
                    row[2] * 100.0,
                    row[3] * 100.0
                );
            }
        }

        Ok(())
    }
}
