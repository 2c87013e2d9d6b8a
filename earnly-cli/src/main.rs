//! Earnly Command Line Interface

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use earnly_core::engagement::StaticGate;
use earnly_core::store::{MemoryStore, StoreSnapshot};
use earnly_core::{
    AdminSettings, EarnlyConfig, EarnlyService, NewTask, PayoutDetails, ReviewDecision, Reward,
    VerifiedSession, WithdrawalAction,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "earnly")]
#[command(about = "Earnly reward ledger CLI")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file, overriding the configured one
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and an empty state file
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
        /// Mobile number that signs in as administrator
        #[arg(long)]
        admin_mobile: Option<String>,
    },
    /// Sign in with a verified session, creating the account on first use
    SignIn {
        account: String,
        mobile: String,
        name: String,
        /// Referral code of the inviting account
        #[arg(short, long)]
        referral: Option<String>,
    },
    /// Show an account with its submissions and withdrawals
    Show { account: String },
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Submit proof for a task
    Submit {
        account: String,
        task: String,
        /// Reference to the uploaded proof
        proof: String,
    },
    /// Approve or reject a submission
    Review {
        actor: String,
        completion: String,
        #[arg(long)]
        reject: bool,
    },
    /// Convert whole batches of points into primary balance
    Convert { account: String },
    /// Claim today's bonus
    Daily { account: String },
    /// Request a withdrawal
    Withdraw {
        account: String,
        amount: Decimal,
        #[command(flatten)]
        payout: PayoutArgs,
    },
    /// Approve or reject a withdrawal
    Decide {
        actor: String,
        withdrawal: String,
        #[arg(long)]
        reject: bool,
    },
    /// Block or unblock an account
    Block {
        actor: String,
        account: String,
        #[arg(long)]
        unblock: bool,
    },
    /// Show or change admin settings
    Settings {
        actor: String,
        #[arg(long)]
        min_withdraw: Option<Decimal>,
        #[arg(long)]
        referral_bonus: Option<Decimal>,
        #[arg(long)]
        referral_points: Option<u64>,
        #[arg(long)]
        fee_percent: Option<Decimal>,
    },
    /// Show the audit log and pending queues
    Log { actor: String },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Post a task
    Add {
        actor: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        link: String,
        #[arg(long, default_value = "")]
        logo: String,
        /// Reward in points
        #[arg(long, conflicts_with = "primary", required_unless_present = "primary")]
        points: Option<u64>,
        /// Reward in primary currency
        #[arg(long)]
        primary: Option<Decimal>,
    },
    /// Activate or deactivate a task
    Toggle { actor: String, task: String },
    /// List tasks, annotated for an account when given
    List {
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Args)]
struct PayoutArgs {
    /// UPI id
    #[arg(long, conflicts_with_all = ["bank_account", "ifsc"], required_unless_present = "bank_account")]
    upi: Option<String>,
    /// Bank account number
    #[arg(long, requires = "ifsc")]
    bank_account: Option<String>,
    /// Bank IFSC code
    #[arg(long)]
    ifsc: Option<String>,
}

impl PayoutArgs {
    fn into_details(self) -> anyhow::Result<PayoutDetails> {
        match (self.upi, self.bank_account, self.ifsc) {
            (Some(upi_id), _, _) => Ok(PayoutDetails::Upi { upi_id }),
            (None, Some(account_no), Some(ifsc)) => Ok(PayoutDetails::Bank { account_no, ifsc }),
            _ => Err(anyhow::anyhow!("Give --upi or --bank-account with --ifsc")),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EarnlyConfig> {
    let path = path.map_or_else(EarnlyConfig::default_config_path, Path::to_path_buf);
    if path.exists() {
        EarnlyConfig::load_from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(EarnlyConfig::default())
    }
}

fn load_store(path: &Path, config: &EarnlyConfig) -> anyhow::Result<MemoryStore> {
    if path.exists() {
        let snapshot = StoreSnapshot::load_from_file(path)
            .with_context(|| format!("loading state from {}", path.display()))?;
        Ok(MemoryStore::from_snapshot(snapshot))
    } else {
        Ok(MemoryStore::new(config.settings.clone()))
    }
}

async fn save_store(store: &MemoryStore, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    store
        .snapshot()
        .await
        .save_to_file(path)
        .with_context(|| format!("saving state to {}", path.display()))
}

fn init(
    cli_config: Option<&Path>,
    state: &Path,
    force: bool,
    admin_mobile: Option<String>,
) -> anyhow::Result<()> {
    let config_path = cli_config.map_or_else(EarnlyConfig::default_config_path, Path::to_path_buf);
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists, pass --force to overwrite",
            config_path.display()
        ));
    }

    let mut config = EarnlyConfig::default();
    config.signup.admin_mobile = admin_mobile;
    config.storage.state_file = state.to_path_buf();
    config.save_to_file(&config_path)?;

    if let Some(parent) = state.parent() {
        std::fs::create_dir_all(parent)?;
    }
    StoreSnapshot {
        settings: config.settings.clone(),
        ..StoreSnapshot::default()
    }
    .save_to_file(state)?;

    println!("Config written to {}", config_path.display());
    println!("State written to {}", state.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_deref())?;
    let state = cli
        .state
        .clone()
        .unwrap_or_else(|| config.storage.state_file.clone());

    let command = match cli.command {
        Commands::Init { force, admin_mobile } => {
            return init(cli.config.as_deref(), &state, force, admin_mobile);
        }
        command => command,
    };

    let store = Arc::new(load_store(&state, &config)?);
    let service = EarnlyService::new(config, store.clone(), Arc::new(StaticGate::completed()))?;
    run(&service, command).await?;

    save_store(&store, &state).await
}

async fn run(service: &EarnlyService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => {
            return Err(anyhow::anyhow!("init does not run against a loaded state"));
        }

        Commands::SignIn { account, mobile, name, referral } => {
            let session = VerifiedSession { account_id: account, mobile };
            let signed = service.sign_in(&session, &name, referral.as_deref()).await?;
            if signed.created {
                println!("Created account {}", signed.account.id);
            }
            print_json(&signed.account)?;
        }

        Commands::Show { account } => {
            print_json(&service.account(&account).await?)?;
            println!("Completions:");
            print_json(&service.completions_for(&account).await?)?;
            println!("Withdrawals:");
            print_json(&service.withdrawals_for(&account).await?)?;
        }

        Commands::Task { command } => match command {
            TaskCommands::Add { actor, title, description, link, logo, points, primary } => {
                let reward = match (points, primary) {
                    (Some(points), _) => Reward::Points(points),
                    (None, Some(amount)) => Reward::Primary(amount),
                    (None, None) => return Err(anyhow::anyhow!("Give --points or --primary")),
                };
                let task = service
                    .create_task(&actor, NewTask { title, description, link, reward, logo })
                    .await?;
                print_json(&task)?;
            }
            TaskCommands::Toggle { actor, task } => {
                let task = service.toggle_task_status(&actor, &task).await?;
                println!("Task {} is now {:?}", task.id, task.status);
            }
            TaskCommands::List { account: Some(account) } => {
                print_json(&service.tasks_for(&account).await?)?;
            }
            TaskCommands::List { account: None } => {
                print_json(&service.tasks().await?)?;
            }
        },

        Commands::Submit { account, task, proof } => {
            let completion = service.submit_proof(&account, &task, proof).await?;
            print_json(&completion)?;
        }

        Commands::Review { actor, completion, reject } => {
            let decision = if reject { ReviewDecision::Reject } else { ReviewDecision::Approve };
            let completion = service.review_proof(&actor, &completion, decision).await?;
            println!("Completion {} {}", completion.id, completion.status);
        }

        Commands::Convert { account } => match service.convert_points(&account).await? {
            Some(conversion) => println!(
                "Converted {} points into {}",
                conversion.points_debited, conversion.primary_credited
            ),
            None => println!("Fewer than 100 points, nothing converted"),
        },

        Commands::Daily { account } => {
            let outcome = service.claim_daily_bonus(&account).await?;
            println!("Claimed {} points, balance now {}", outcome.points, outcome.balances.points);
        }

        Commands::Withdraw { account, amount, payout } => {
            let request = service
                .request_withdrawal(&account, amount, payout.into_details()?)
                .await?;
            let quote = service.quote_withdrawal(request.amount).await?;
            println!(
                "Withdrawal {} pending: {} (fee {}, payable {})",
                request.id, request.amount, quote.fee, quote.payable
            );
        }

        Commands::Decide { actor, withdrawal, reject } => {
            let action = if reject { WithdrawalAction::Reject } else { WithdrawalAction::Approve };
            let request = service.decide_withdrawal(&actor, &withdrawal, action).await?;
            println!("Withdrawal {} {}", request.id, request.status);
        }

        Commands::Block { actor, account, unblock } => {
            let account = service.set_blocked(&actor, &account, !unblock).await?;
            println!("Account {} blocked: {}", account.id, account.is_blocked);
        }

        Commands::Settings { actor, min_withdraw, referral_bonus, referral_points, fee_percent } => {
            let current = service.settings().await?;
            let updated = AdminSettings {
                min_withdraw: min_withdraw.unwrap_or(current.min_withdraw),
                referral_bonus_primary: referral_bonus.unwrap_or(current.referral_bonus_primary),
                referral_bonus_points: referral_points.unwrap_or(current.referral_bonus_points),
                platform_fee_percent: fee_percent.unwrap_or(current.platform_fee_percent),
            };
            if updated == current {
                print_json(&current)?;
            } else {
                print_json(&service.update_settings(&actor, updated).await?)?;
            }
        }

        Commands::Log { actor } => {
            print_json(&service.dashboard(&actor).await?)?;
            println!("Pending reviews:");
            print_json(&service.pending_reviews(&actor).await?)?;
            println!("Pending withdrawals:");
            print_json(&service.pending_withdrawals(&actor).await?)?;
            println!("Audit log:");
            print_json(&service.audit_log(&actor).await?)?;
        }
    }

    Ok(())
}
