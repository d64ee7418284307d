//! aviary - command-line front end for the aviary backend

use anyhow::{Context, Result};
use aviary_lib::api::{cage_label, cages_for_species, filter_cages_by_code, DEFAULT_PAGE_SIZE};
use aviary_lib::models::{Cage, LoginRequest, Parrot, Species};
use aviary_lib::{init_tracing, ApiClient, ClientConfig};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "aviary")]
#[command(about = "Manage parrots, cages and species of an aviary")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides AVIARY_API_BASE_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory holding the credential store (overrides AVIARY_DATA_DIR)
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Per-call timeout in milliseconds (overrides AVIARY_TIMEOUT_MS)
    #[arg(short = 't', long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the credentials
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the stored credentials
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Check whether a username is registered
    CheckUsername { username: String },
    /// Parrot operations
    Parrots {
        #[command(subcommand)]
        command: ParrotCommands,
    },
    /// Cage operations
    Cages {
        #[command(subcommand)]
        command: CageCommands,
    },
    /// Species operations
    Species {
        #[command(subcommand)]
        command: SpeciesCommands,
    },
    /// Cage utilization, gender and per-species counts
    Stats,
}

#[derive(Subcommand)]
enum ParrotCommands {
    /// One page of parrots
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: u32,
    },
    /// Every parrot, unpaginated
    All,
    Add {
        #[command(flatten)]
        fields: ParrotFields,
    },
    Update {
        id: i64,
        #[command(flatten)]
        fields: ParrotFields,
    },
    Delete { id: i64 },
    /// Parrots living in a cage
    ByCage { cage_id: i64 },
    /// Search by (partial) ring number
    Search { ring: String },
}

#[derive(clap::Args)]
struct ParrotFields {
    #[arg(long)]
    ring: String,
    #[arg(long)]
    species: Option<i64>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    cage: Option<i64>,
}

impl ParrotFields {
    fn into_parrot(self, id: Option<i64>) -> Parrot {
        Parrot {
            id,
            ring_number: self.ring,
            species: self.species,
            gender: self.gender,
            cage_id: self.cage,
        }
    }
}

#[derive(Subcommand)]
enum CageCommands {
    /// One page of cages with their parrot count
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: u32,
    },
    /// Every cage, optionally filtered
    All {
        /// Case-insensitive part of the cage code
        #[arg(long)]
        code: Option<String>,
        /// Only cages assigned to this species
        #[arg(long)]
        species: Option<i64>,
        /// Print "<species>-<code>" labels instead of JSON
        #[arg(long)]
        labels: bool,
    },
    Get { id: i64 },
    /// Cages assigned to one or more species
    BySpecies {
        #[arg(required = true)]
        species_ids: Vec<i64>,
    },
    Search {
        keyword: String,
        /// Include parrot counts
        #[arg(long)]
        with_count: bool,
    },
    Add {
        #[arg(long)]
        code: String,
        /// Species the cage is assigned to
        #[arg(long)]
        species: Option<i64>,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum SpeciesCommands {
    List,
    Add { name: String },
    Update { id: i64, name: String },
    Delete { id: i64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            let pair = client
                .login(&LoginRequest { username, password })
                .await
                .context("login failed")?;
            println!("Logged in as {} ({})", pair.username, pair.nickname);
        }
        Commands::Logout => {
            client.logout()?;
            println!("Logged out");
        }
        Commands::Whoami => match client.credentials()? {
            Some(pair) => println!("{} ({})", pair.username, pair.nickname),
            None => println!("Not logged in"),
        },
        Commands::CheckUsername { username } => {
            print_json(&serde_json::json!({ "exists": client.check_username(&username).await? }))?
        }
        Commands::Parrots { command } => match command {
            ParrotCommands::List { page, size } => {
                let parrots = client.parrots(page, size).await?;
                print_json(&parrots)?;
                if parrots.has_more() {
                    eprintln!("More parrots available, use --page {}", page + 1);
                }
            }
            ParrotCommands::All => print_json(&client.all_parrots().await?)?,
            ParrotCommands::Add { fields } => {
                print_json(&client.add_parrot(&fields.into_parrot(None)).await?)?
            }
            ParrotCommands::Update { id, fields } => {
                print_json(&client.update_parrot(id, &fields.into_parrot(Some(id))).await?)?
            }
            ParrotCommands::Delete { id } => print_json(&client.delete_parrot(id).await?)?,
            ParrotCommands::ByCage { cage_id } => {
                print_json(&client.parrots_by_cage(cage_id).await?)?
            }
            ParrotCommands::Search { ring } => {
                print_json(&client.search_parrots_by_ring(&ring).await?)?
            }
        },
        Commands::Cages { command } => match command {
            CageCommands::List { page, size } => print_json(&client.cages(page, size).await?)?,
            CageCommands::All {
                code,
                species,
                labels,
            } => {
                let mut cages = client.all_cages().await?;
                if let Some(species_id) = species {
                    cages = cages_for_species(&cages, species_id);
                }
                if let Some(code) = code {
                    cages = filter_cages_by_code(&cages, &code);
                }
                if labels {
                    let species = client.species().await?;
                    for cage in &cages {
                        println!("{}", cage_label(cage, &species));
                    }
                } else {
                    print_json(&cages)?;
                }
            }
            CageCommands::Get { id } => print_json(&client.cage(id).await?)?,
            CageCommands::BySpecies { species_ids } => {
                print_json(&client.cages_by_species(&species_ids).await?)?
            }
            CageCommands::Search { keyword, with_count } => {
                let cages = if with_count {
                    client.search_cages_with_parrot_count(&keyword).await?
                } else {
                    client.search_cages(&keyword).await?
                };
                print_json(&cages)?
            }
            CageCommands::Add { code, species } => {
                let cage = Cage {
                    id: None,
                    cage_code: code,
                    location: species.map(|id| id.to_string()),
                    parrot_count: None,
                };
                print_json(&client.add_cage(&cage).await?)?
            }
            CageCommands::Delete { id } => print_json(&client.delete_cage(id).await?)?,
        },
        Commands::Species { command } => match command {
            SpeciesCommands::List => print_json(&client.species().await?)?,
            SpeciesCommands::Add { name } => {
                print_json(&client.create_species(&Species { id: None, name }).await?)?
            }
            SpeciesCommands::Update { id, name } => print_json(
                &client
                    .update_species(id, &Species { id: Some(id), name })
                    .await?,
            )?,
            SpeciesCommands::Delete { id } => print_json(&client.delete_species(id).await?)?,
        },
        Commands::Stats => print_json(&client.statistics().await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(ms) = cli.timeout_ms {
        config.timeout_ms = ms;
    }
    debug!("[CLI] Using backend {}", config.api_base_url);

    let client = ApiClient::open(config)
        .context("failed to initialize client")?
        .with_session_expired_hook(|event| {
            eprintln!(
                "Session expired ({}). Run `aviary login` to sign in again.",
                event.reason
            );
        });

    if let Err(e) = run(&client, cli.command).await {
        error!("[CLI] Command failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
