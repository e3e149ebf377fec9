use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::{Config, ConfigError, PowerOffSettings};
use crate::ledger::{CreditDecision, CreditLedger};
use crate::mailbox::MailSource;
use crate::notify::Notifier;
use crate::probe::Probe;
use crate::remote::RemoteRunner;
use crate::schedule::ScheduleStore;
use crate::wol::{HardwareAddress, WolSender};

/// Which inbound-mail command a run is scanning for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailAction {
    PowerOn,
    PowerOff,
    ExtendShutdown,
}

/// Final outcome of one mail-triggered decision; picks the reply body.
enum Outcome {
    Disabled,
    AlreadyOn,
    Waking,
    AlreadyOff,
    ShuttingDown,
    Extended(String),
    ExtendFailed,
    CreditsExhausted,
}

impl Outcome {
    fn body(&self, node: &str) -> String {
        match self {
            Outcome::Disabled => "Hi,\n\nThe service is currently disabled, there is no need \
                 to send commands for now.\n\nHave a nice day!\n"
                .to_string(),
            Outcome::AlreadyOn => format!(
                "Hi,\n\n{node} is already up, there is no need to send the power-on \
                 command again.\n\nHave a nice day!\n"
            ),
            Outcome::Waking => {
                format!("Hi,\n\n{node} is being woken up, give it a moment.\n\nHave a nice day!\n")
            }
            Outcome::AlreadyOff => format!(
                "Hi,\n\n{node} is already off, there is no need to send the power-off \
                 command again.\n\nHave a nice day!\n"
            ),
            Outcome::ShuttingDown => format!(
                "Hi,\n\n{node} is being shut down, give it a moment.\n\nHave a nice day!\n"
            ),
            Outcome::Extended(time) => format!(
                "Hi,\n\nThanks for your message. {node} stays up until {time}.\n\n\
                 Have a nice day!\n"
            ),
            Outcome::ExtendFailed => "Hi,\n\nUnfortunately the scheduled shutdown could not \
                 be changed.\n\nHave a nice day!\n"
                .to_string(),
            Outcome::CreditsExhausted => format!(
                "Hi,\n\nYou have no power-on requests left for this week, {node} stays \
                 as it is.\n\nHave a nice day!\n"
            ),
        }
    }
}

struct CommandSpec<'a> {
    keyword: &'a str,
    allowed_senders: &'a [String],
}

/// The power lifecycle command engine. One instance performs exactly
/// one pass for one invoked action; all side effects go through the
/// injected capability seams.
pub struct Engine<'a, P, W, R, N> {
    cfg: &'a Config,
    probe: P,
    wol: W,
    remote: R,
    notify: N,
    cron_path: PathBuf,
    state_path: PathBuf,
}

impl<'a, P, W, R, N> Engine<'a, P, W, R, N>
where
    P: Probe,
    W: WolSender,
    R: RemoteRunner,
    N: Notifier,
{
    pub fn new(
        cfg: &'a Config,
        probe: P,
        wol: W,
        remote: R,
        notify: N,
        cron_path: &Path,
        state_path: &Path,
    ) -> Self {
        Self {
            cfg,
            probe,
            wol,
            remote,
            notify,
            cron_path: cron_path.to_path_buf(),
            state_path: state_path.to_path_buf(),
        }
    }

    // ------------------------------------------------------------
    // Cron-triggered actions
    // ------------------------------------------------------------

    pub async fn power_on(&self) -> Result<(), ConfigError> {
        self.dry_run_banner("NOTHING WILL BE WOKEN");
        if !self.cfg.general.enabled {
            tracing::info!("PowerOn - service is disabled");
            return Ok(());
        }

        let node = &self.cfg.node;
        if self.probe.is_open(&node.ip, node.port).await {
            tracing::info!("PowerOn - {} already running", node.name);
            return Ok(());
        }
        if self.cfg.general.dry_run {
            return Ok(());
        }

        if let Err(e) = self.wol.wake(&node.mac).await {
            tracing::error!("PowerOn - failed to send magic packet to {}: {}", node.mac, e);
            return Ok(());
        }
        tracing::info!("PowerOn - WOL command sent for {}", node.name);
        self.notify
            .push(&format!("PowerOn - WOL command sent for {}", node.name))
            .await;
        Ok(())
    }

    pub async fn power_off(&self) -> Result<(), ConfigError> {
        let settings = self.power_off_settings()?;
        let (user, password, ssh_port) = self.primary_credentials()?;

        self.dry_run_banner("NOTHING WILL BE PUT TO SLEEP");
        if !self.cfg.general.enabled {
            tracing::info!("PowerOff - service is disabled");
            return Ok(());
        }

        let node = &self.cfg.node;
        if !self.probe.is_open(&node.ip, node.port).await {
            tracing::info!("PowerOff - {} already down", node.name);
            return Ok(());
        }
        if self.cfg.general.dry_run {
            return Ok(());
        }

        self.run_remote(user, password, &node.ip, ssh_port, &settings.command, &node.name)
            .await;
        tracing::info!("PowerOff - SLEEP command sent for {}", node.name);
        self.notify
            .push(&format!("PowerOff - SLEEP command sent for {}", node.name))
            .await;
        self.reset_schedule();
        Ok(())
    }

    /// Wakes the extra nodes, but only while the primary is up:
    /// siblings follow the primary's power state.
    pub async fn power_on_extra(&self) -> Result<(), ConfigError> {
        if self.cfg.extra_nodes.is_empty() {
            return Err(ConfigError::MissingSection("extra_nodes"));
        }
        self.dry_run_banner("NOTHING WILL BE WOKEN");
        if !self.cfg.general.enabled {
            tracing::info!("PowerOn extra nodes - service is disabled");
            return Ok(());
        }

        let node = &self.cfg.node;
        if !self.probe.is_open(&node.ip, node.port).await {
            tracing::debug!("primary {} is down, leaving extra nodes alone", node.name);
            return Ok(());
        }

        for extra in &self.cfg.extra_nodes {
            if self.probe.is_alive(&extra.ip).await {
                tracing::debug!("extra node {} is already up", extra.name);
                continue;
            }
            if self.cfg.general.dry_run {
                continue;
            }
            let mac: HardwareAddress = match extra.mac.parse() {
                Ok(mac) => mac,
                Err(e) => {
                    tracing::error!("extra node {}: {}", extra.name, e);
                    continue;
                }
            };
            if let Err(e) = self.wol.wake(&mac).await {
                tracing::error!("extra node {}: failed to send magic packet: {}", extra.name, e);
                continue;
            }
            tracing::info!(
                "PowerOn extra nodes - WOL command sent for {} - {}",
                extra.name,
                mac
            );
            self.notify
                .push(&format!(
                    "PowerOn extra nodes - WOL command sent for {}",
                    extra.name
                ))
                .await;
        }
        Ok(())
    }

    /// Shuts the extra nodes down once the primary has gone
    /// unreachable. Nodes without ssh credentials are skipped.
    pub async fn power_off_extra(&self) -> Result<(), ConfigError> {
        if self.cfg.extra_nodes.is_empty() {
            return Err(ConfigError::MissingSection("extra_nodes"));
        }
        let settings = self.power_off_settings()?;

        self.dry_run_banner("NOTHING WILL BE PUT TO SLEEP");
        if !self.cfg.general.enabled {
            tracing::info!("PowerOff extra nodes - service is disabled");
            return Ok(());
        }

        let node = &self.cfg.node;
        if self.probe.is_open(&node.ip, node.port).await {
            tracing::debug!("primary {} is still up, leaving extra nodes alone", node.name);
            return Ok(());
        }

        for extra in &self.cfg.extra_nodes {
            let Some((user, password, ssh_port)) = extra.ssh_credentials() else {
                tracing::debug!("extra node {} has no ssh credentials, skipping", extra.name);
                continue;
            };
            if !self.probe.is_alive(&extra.ip).await {
                tracing::debug!("extra node {} is already down", extra.name);
                continue;
            }
            if self.cfg.general.dry_run {
                continue;
            }
            self.run_remote(user, password, &extra.ip, ssh_port, &settings.command, &extra.name)
                .await;
            tracing::info!("PowerOff extra nodes - SLEEP command sent for {}", extra.name);
            self.notify
                .push(&format!(
                    "PowerOff extra nodes - SLEEP command sent for {}",
                    extra.name
                ))
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // Mail-triggered actions
    // ------------------------------------------------------------

    /// Scans the mailbox for one command keyword and processes every
    /// matching, authorized message. A failing message never aborts
    /// the batch; messages that got an outcome reply are flagged and
    /// the mailbox is expunged once at the end.
    pub async fn process_mailbox<M: MailSource>(
        &self,
        source: &mut M,
        action: MailAction,
    ) -> Result<(), ConfigError> {
        let command = self.command_for(action)?;
        let keyword = command.keyword.to_lowercase();
        self.dry_run_banner(match action {
            MailAction::PowerOn => "NOTHING WILL BE WOKEN",
            MailAction::PowerOff | MailAction::ExtendShutdown => "NOTHING WILL BE PUT TO SLEEP",
        });

        let mut ledger = self.power_on_ledger(action);

        let messages = match source.fetch_all().await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("mailbox scan failed: {}", e);
                return Ok(());
            }
        };
        tracing::debug!("scanning {} inbox messages", messages.len());

        for message in &messages {
            if message.subject.to_lowercase() != keyword {
                tracing::debug!("message {}: subject not recognized, skipping", message.seq);
                continue;
            }
            let Some(sender) = message.sender.as_deref() else {
                tracing::debug!("message {}: no sender address, skipping", message.seq);
                continue;
            };
            if !command.allowed_senders.iter().any(|s| s == sender) {
                tracing::info!("message {}: sender {} not in list", message.seq, sender);
                continue;
            }
            tracing::debug!("found matching subject from {}", sender);

            if !self.cfg.general.enabled {
                tracing::debug!("service is disabled, telling {}", sender);
                // The message stays in the mailbox so it is picked up
                // again once the service is re-enabled.
                self.reply(action, sender, &Outcome::Disabled).await;
                continue;
            }

            let outcome = match action {
                MailAction::PowerOn => self.mail_power_on(sender, ledger.as_mut()).await,
                MailAction::PowerOff => self.mail_power_off(sender).await,
                MailAction::ExtendShutdown => self.mail_extend(sender).await,
            };
            let Some(outcome) = outcome else { continue };
            self.reply(action, sender, &outcome).await;

            if !self.cfg.general.dry_run {
                if let Err(e) = source.mark_deleted(message.seq).await {
                    tracing::error!("failed to flag message {}: {}", message.seq, e);
                }
            }
        }

        if !self.cfg.general.dry_run {
            if let Err(e) = source.expunge().await {
                tracing::error!("failed to expunge mailbox: {}", e);
            }
        }
        Ok(())
    }

    async fn mail_power_on(
        &self,
        sender: &str,
        ledger: Option<&mut CreditLedger>,
    ) -> Option<Outcome> {
        let node = &self.cfg.node;
        if self.probe.is_open(&node.ip, node.port).await {
            tracing::info!("PowerOn - {} already running, requested by {}", node.name, sender);
            return Some(Outcome::AlreadyOn);
        }
        if let Some(ledger) = &ledger {
            if ledger.decide(sender) == CreditDecision::Exhausted {
                tracing::info!("PowerOn - no requests left this week for {}", sender);
                return Some(Outcome::CreditsExhausted);
            }
        }
        if self.cfg.general.dry_run {
            return Some(Outcome::Waking);
        }

        if let Err(e) = self.wol.wake(&node.mac).await {
            tracing::error!("PowerOn - failed to send magic packet to {}: {}", node.mac, e);
            return None;
        }
        tracing::info!("PowerOn - WOL command sent, requested by {}", sender);
        self.notify
            .push(&format!("PowerOnByEmail - WOL command sent, requested by {sender}"))
            .await;
        if let Some(ledger) = ledger {
            if let Err(e) = ledger.consume(sender) {
                tracing::error!("{}", e);
            }
        }
        Some(Outcome::Waking)
    }

    async fn mail_power_off(&self, sender: &str) -> Option<Outcome> {
        // Both were checked before the scan started.
        let settings = self.cfg.power_off.as_ref()?;
        let (user, password, ssh_port) = self.cfg.node.ssh_credentials()?;

        let node = &self.cfg.node;
        if !self.probe.is_open(&node.ip, node.port).await {
            tracing::info!("PowerOff - {} not running, requested by {}", node.name, sender);
            return Some(Outcome::AlreadyOff);
        }
        if self.cfg.general.dry_run {
            return Some(Outcome::ShuttingDown);
        }

        self.run_remote(user, password, &node.ip, ssh_port, &settings.command, &node.name)
            .await;
        tracing::info!("PowerOff - SLEEP command sent, requested by {}", sender);
        self.notify
            .push(&format!("PowerOffByEmail - SLEEP command sent, requested by {sender}"))
            .await;
        self.reset_schedule();
        Some(Outcome::ShuttingDown)
    }

    async fn mail_extend(&self, sender: &str) -> Option<Outcome> {
        let settings = self.cfg.extend.as_ref()?;
        let store = ScheduleStore::new(&self.cron_path, settings);
        let result = if self.cfg.general.dry_run {
            store.preview_extend(settings.extend_hours)
        } else {
            store.extend(settings.extend_hours)
        };
        match result {
            Ok(time) => {
                tracing::info!("shutdown extended to {}, requested by {}", time, sender);
                Some(Outcome::Extended(time))
            }
            Err(e) => {
                tracing::error!("could not extend the shutdown schedule: {}", e);
                Some(Outcome::ExtendFailed)
            }
        }
    }

    // ------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------

    fn command_for(&self, action: MailAction) -> Result<CommandSpec<'_>, ConfigError> {
        match action {
            MailAction::PowerOn => {
                let command = self
                    .cfg
                    .power_on
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("power_on"))?;
                Ok(CommandSpec {
                    keyword: &command.keyword,
                    allowed_senders: &command.allowed_senders,
                })
            }
            MailAction::PowerOff => {
                let settings = self.power_off_settings()?;
                let keyword = settings.keyword.as_deref().ok_or(ConfigError::MissingOption {
                    section: "power_off",
                    key: "keyword",
                })?;
                let allowed_senders =
                    settings
                        .allowed_senders
                        .as_deref()
                        .ok_or(ConfigError::MissingOption {
                            section: "power_off",
                            key: "allowed_senders",
                        })?;
                self.primary_credentials()?;
                Ok(CommandSpec {
                    keyword,
                    allowed_senders,
                })
            }
            MailAction::ExtendShutdown => {
                let settings = self
                    .cfg
                    .extend
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("extend_time"))?;
                Ok(CommandSpec {
                    keyword: &settings.keyword,
                    allowed_senders: &settings.allowed_senders,
                })
            }
        }
    }

    fn power_off_settings(&self) -> Result<&PowerOffSettings, ConfigError> {
        self.cfg
            .power_off
            .as_ref()
            .ok_or(ConfigError::MissingSection("power_off"))
    }

    fn primary_credentials(&self) -> Result<(&str, &str, u16), ConfigError> {
        self.cfg
            .node
            .ssh_credentials()
            .ok_or_else(|| ConfigError::MissingCredentials(self.cfg.node.name.clone()))
    }

    /// The credit ledger only applies to mail-triggered power-on, and
    /// only when credits are configured.
    fn power_on_ledger(&self, action: MailAction) -> Option<CreditLedger> {
        if action != MailAction::PowerOn {
            return None;
        }
        let defaults = self.cfg.power_on.as_ref()?.credit_defaults()?;
        Some(CreditLedger::load(
            &self.state_path,
            &defaults,
            Local::now().naive_local(),
        ))
    }

    async fn reply(&self, action: MailAction, sender: &str, outcome: &Outcome) {
        let prefix = match action {
            MailAction::PowerOn => "PowerOn",
            MailAction::PowerOff => "PowerOff",
            MailAction::ExtendShutdown => "ExtendShutdown",
        };
        let subject = format!("{} - {}", prefix, self.cfg.node.name);
        self.notify
            .reply(sender, &subject, &outcome.body(&self.cfg.node.name))
            .await;
    }

    /// Fire-and-forget: remote-side errors are logged, never escalated.
    /// The target is expected to drop off the network whether or not
    /// the shell reported trouble.
    async fn run_remote(
        &self,
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        command: &str,
        name: &str,
    ) {
        match self.remote.run(user, password, host, port, command).await {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    tracing::info!("{}: {}", name, output.stdout.trim());
                }
                if !output.stderr.trim().is_empty() {
                    tracing::error!("{}: {}", name, output.stderr.trim());
                }
                if output.exit_code.is_some_and(|code| code != 0) {
                    tracing::error!(
                        "remote command on {} exited with {}",
                        name,
                        output.exit_code.unwrap_or(-1)
                    );
                }
            }
            Err(e) => tracing::error!("remote command on {} could not run: {}", name, e),
        }
    }

    fn reset_schedule(&self) {
        let Some(settings) = self.cfg.extend.as_ref() else {
            return;
        };
        let store = ScheduleStore::new(&self.cron_path, settings);
        if let Err(e) = store.reset_to_default() {
            tracing::error!("failed to reset the shutdown schedule: {}", e);
        }
    }

    fn dry_run_banner(&self, what: &str) {
        if self.cfg.general.dry_run {
            tracing::info!("**** DRY RUN, {} ****", what);
        }
    }
}
