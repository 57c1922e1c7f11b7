use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tradelane::config::AppConfig;
use tradelane::domain::{ConversionDirection, MilestoneSchedule, TradeSpec};
use tradelane::error::{Result, TradelaneError};
use tradelane::flow::{FlowOrchestrator, FlowRequest};
use tradelane::persistence::TradeStore;
use tradelane::rails::{
    CustomerIdentity, OnrampRestClient, PayoutRestClient, RetryPolicy, WebhookServer,
};
use tradelane::services::{
    DisbursementService, EscrowService, OnrampService, PayoutDetails, RateQuoter,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tradelane", about = "Cross-border trade payment orchestration")]
struct Cli {
    /// Config directory (TRADELANE__* env vars override)
    #[arg(short, long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a conversion quote
    Quote {
        /// Source currency code (e.g. NGN)
        #[arg(long)]
        source: String,
        /// Destination currency code (e.g. USDC)
        #[arg(long)]
        dest: String,
        /// Amount in the source currency
        #[arg(long)]
        amount: Decimal,
        /// Convert settlement asset into local currency instead
        #[arg(long, default_value = "false")]
        asset_to_local: bool,
    },
    /// Create an onramp order and wait for the buyer's deposit
    Order {
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: String,
        /// Destination settlement wallet
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        country: String,
    },
    /// Run a full payment flow: onramp, escrow funding, first milestone
    Flow {
        /// Deposit amount in the buyer's local currency
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: String,
        /// Trade value in the settlement asset
        #[arg(long)]
        trade_amount: Decimal,
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        buyer: String,
        #[arg(long)]
        counterparty: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        country: String,
        /// Days until the delivery deadline
        #[arg(long, default_value = "30")]
        deadline_days: i64,
        /// Require a quality inspection before shipment milestones release
        #[arg(long, default_value = "false")]
        inspection: bool,
        /// Counterparty payout account name
        #[arg(long)]
        payout_name: String,
        #[arg(long)]
        payout_bank: String,
        #[arg(long)]
        payout_account: String,
        /// Counterparty's local currency
        #[arg(long)]
        payout_currency: String,
        #[arg(long, default_value = "TRADE_GOODS")]
        purpose: String,
    },
    /// Serve the webhook endpoint and route verified events
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config)?;
    if let Err(problems) = config.validate() {
        for problem in &problems {
            eprintln!("config: {}", problem);
        }
        return Err(TradelaneError::Validation(format!(
            "{} configuration problem(s)",
            problems.len()
        )));
    }

    init_logging(&config);

    match cli.command {
        Commands::Quote {
            source,
            dest,
            amount,
            asset_to_local,
        } => {
            let services = Services::build(&config)?;
            let direction = if asset_to_local {
                ConversionDirection::AssetToLocal
            } else {
                ConversionDirection::LocalToAsset
            };
            let quote = services
                .quoter
                .get_quote(&source, &dest, amount, direction)
                .await?;
            println!(
                "{} {} -> {} {} (rate {}, fee {}, expires {})",
                quote.source_amount,
                quote.source_currency,
                quote.destination_amount,
                quote.destination_currency,
                quote.rate,
                quote.fee,
                quote.expires_at
            );
        }
        Commands::Order {
            amount,
            currency,
            wallet,
            name,
            email,
            country,
        } => {
            let services = Services::build(&config)?;
            let customer = CustomerIdentity {
                name,
                email,
                country,
            };
            let order = services
                .onramp
                .create_order(amount, &currency, &wallet, customer, None)
                .await?;
            if let Some(instructions) = &order.payment_instructions {
                println!("Pay with reference {}", instructions.reference);
                if let Some(bank) = &instructions.bank_name {
                    println!(
                        "  bank: {} account: {}",
                        bank,
                        instructions.account_number.as_deref().unwrap_or("-")
                    );
                }
            }
            let settled = services.onramp.await_completion(&order.id).await?;
            println!("Order {} ended {}", settled.id, settled.status);
        }
        Commands::Flow {
            amount,
            currency,
            trade_amount,
            wallet,
            buyer,
            counterparty,
            email,
            country,
            deadline_days,
            inspection,
            payout_name,
            payout_bank,
            payout_account,
            payout_currency,
            purpose,
        } => {
            let services = Services::build(&config)?;
            let request = FlowRequest {
                source_amount: amount,
                source_currency: currency,
                destination_wallet: wallet,
                customer: CustomerIdentity {
                    name: buyer.clone(),
                    email,
                    country,
                },
                idempotency_key: None,
                trade: TradeSpec {
                    buyer_ref: buyer,
                    counterparty_ref: counterparty,
                    total_amount: trade_amount,
                    currency: config.policy.settlement_asset.clone(),
                    delivery_deadline: Utc::now() + ChronoDuration::days(deadline_days),
                    quality_requirements: String::new(),
                    inspection_required: inspection,
                },
                payout: PayoutDetails {
                    name: payout_name,
                    bank_code: payout_bank,
                    account_number: payout_account,
                    contact: None,
                    currency: payout_currency,
                    purpose_code: purpose,
                },
            };

            let outcome = services.orchestrator.run(request).await?;
            println!(
                "Flow {} active: trade {}, first transfer {}",
                outcome.flow_id, outcome.trade_id, outcome.transfer_ref
            );
            let report = services.orchestrator.track_status(outcome.trade_id)?;
            println!(
                "Status: onramp {} / trade {} / overall {:?}",
                report.onramp, report.trade, report.overall
            );
        }
        Commands::Serve => {
            let services = Services::build(&config)?;
            run_webhook_loop(&config, services).await?;
        }
    }

    Ok(())
}

struct Services {
    quoter: Arc<RateQuoter>,
    onramp: Arc<OnrampService>,
    orchestrator: Arc<FlowOrchestrator>,
}

impl Services {
    fn build(config: &AppConfig) -> Result<Self> {
        let onramp_client = Arc::new(OnrampRestClient::new(&config.onramp, &config.execution)?);
        let payout_client = Arc::new(PayoutRestClient::new(&config.payout, &config.execution)?);

        let quoter = Arc::new(RateQuoter::new(
            onramp_client.clone(),
            config.policy.quote_ttl_secs,
            RetryPolicy::from_execution(&config.execution),
            Duration::from_millis(config.execution.quote_timeout_ms),
        ));
        let payout_quoter = Arc::new(RateQuoter::new(
            payout_client.clone(),
            config.policy.quote_ttl_secs,
            RetryPolicy::from_execution(&config.execution),
            Duration::from_millis(config.execution.quote_timeout_ms),
        ));

        let onramp = Arc::new(OnrampService::new(
            onramp_client,
            &config.policy,
            &config.execution,
        ));

        let schedule = MilestoneSchedule::new(config.policy.milestone_schedule.clone())?;
        let escrow = Arc::new(EscrowService::new(Arc::new(TradeStore::new()), schedule));

        let disbursement = Arc::new(DisbursementService::new(
            payout_client,
            payout_quoter,
            escrow.clone(),
            config.policy.settlement_asset.clone(),
            &config.execution,
        ));

        let orchestrator = Arc::new(FlowOrchestrator::new(
            onramp.clone(),
            escrow,
            disbursement,
        ));

        Ok(Self {
            quoter,
            onramp,
            orchestrator,
        })
    }
}

async fn run_webhook_loop(config: &AppConfig, services: Services) -> Result<()> {
    let (server, mut deliveries) = WebhookServer::new(config.webhook.secret.clone());
    let bind_addr = config.webhook.bind_addr.clone();

    let server_handle = tokio::spawn(async move { server.serve(&bind_addr).await });

    let orchestrator = services.orchestrator.clone();
    let router = tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            info!(
                "Verified webhook from rail '{}': {:?}",
                delivery.rail, delivery.event.status
            );
            if let Err(e) = orchestrator.apply_webhook(&delivery.event) {
                warn!("Webhook event dropped: {}", e);
            }
        }
    });

    info!("Webhook server listening on {}", config.webhook.bind_addr);
    shutdown_signal().await;
    info!("Shutting down");

    router.abort();
    server_handle.abort();
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,tradelane={}", config.logging.level)));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
