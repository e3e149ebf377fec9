mod config;
mod engine;
mod ledger;
mod mailbox;
mod mailer;
mod notify;
mod probe;
mod remote;
mod schedule;
mod wol;

use std::path::Path;
use std::process::ExitCode;

use config::{Config, ConfigError};
use engine::{Engine, MailAction};
use mailbox::ImapMailbox;
use mailer::Mailer;
use notify::{Notifier, WardenNotifier};
use probe::{NetProbe, Probe};
use remote::{RemoteRunner, SshRunner};
use wol::{UdpWol, WolSender};

const CRON_FILE: &str = "/etc/crontabs/root";
const STATE_FILE: &str = "/config/power-warden-credits.json";
const USAGE: &str = "usage: power-warden <config.json> <power-on|power-off|power-on-extra|\
power-off-extra|power-on-mail|power-off-mail|extend-mail>";

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(action)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let cfg = match Config::load(Path::new(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(false);
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cfg.general.verbose_logging);

    let notify = WardenNotifier::new(cfg.pushover.clone(), cfg.mail.clone().map(Mailer::new));
    let engine = Engine::new(
        &cfg,
        NetProbe::default(),
        UdpWol,
        SshRunner,
        notify,
        Path::new(CRON_FILE),
        Path::new(STATE_FILE),
    );

    let result = match action.as_str() {
        "power-on" => engine.power_on().await,
        "power-off" => engine.power_off().await,
        "power-on-extra" => engine.power_on_extra().await,
        "power-off-extra" => engine.power_off_extra().await,
        "power-on-mail" => run_mail_action(&cfg, &engine, MailAction::PowerOn).await,
        "power-off-mail" => run_mail_action(&cfg, &engine, MailAction::PowerOff).await,
        "extend-mail" => run_mail_action(&cfg, &engine, MailAction::ExtendShutdown).await,
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_mail_action<P, W, R, N>(
    cfg: &Config,
    engine: &Engine<'_, P, W, R, N>,
    action: MailAction,
) -> Result<(), ConfigError>
where
    P: Probe,
    W: WolSender,
    R: RemoteRunner,
    N: Notifier,
{
    let Some(mail) = cfg.mail.as_ref() else {
        return Err(ConfigError::MissingSection("mail"));
    };
    let mut mailbox = match ImapMailbox::connect(mail).await {
        Ok(mailbox) => mailbox,
        Err(e) => {
            // Transient network failure: logged, not escalated.
            tracing::error!("cannot reach the mailbox: {}", e);
            return Ok(());
        }
    };
    let result = engine.process_mailbox(&mut mailbox, action).await;
    if let Err(e) = mailbox.logout().await {
        tracing::debug!("imap logout failed: {}", e);
    }
    result
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}
