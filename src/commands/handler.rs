//! Applies parsed commands to the tenant store and renders replies.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::channels::{IncomingCommand, escape_html};
use crate::commands::parser::Command;
use crate::error::{Error, ValidationError};
use crate::restart::{MIB, MemoryProbe};
use crate::rules::{RuleChange, RuleSet, Setting, Term};
use crate::stats::RuntimeStats;
use crate::store::{TenantId, TenantStore};

const HELP: &str = "<b>🛠️ Commands</b>\n\
/add word [word..] [clean|clean-i|clean-e] [+include..] [-exclude..]\n\
  └─ /add mk +sell -wtb\n\
  └─ /add mk clean +sell (replace terms)\n\
/del word [word..] - delete rules\n\
/list - show rules\n\
/include [term..] - default include terms for new rules\n\
/exclude [term..] - default exclude terms for new rules\n\
/block term [term..] - block globally\n\
/unblock term [term..] - remove global block\n\
/blocklist - show global blocks\n\
/setsummary on|off - match summaries\n\
/setfullword on|off - full-word matching\n\
/setregex on|off - regex matching\n\
/setinterval min [max] - polling interval (admin)\n\
/setnotifylimit N - dedup history size (0 = unbounded)\n\
/status - runtime status";

pub struct CommandHandler {
    store: Arc<TenantStore>,
    stats: Arc<RuntimeStats>,
    memory: Arc<dyn MemoryProbe>,
    admin: Option<TenantId>,
    restart_policy: String,
}

impl CommandHandler {
    pub fn new(
        store: Arc<TenantStore>,
        stats: Arc<RuntimeStats>,
        memory: Arc<dyn MemoryProbe>,
        admin: Option<TenantId>,
        restart_policy: String,
    ) -> Self {
        Self {
            store,
            stats,
            memory,
            admin,
            restart_policy,
        }
    }

    /// Handle one command and return the reply text (HTML).
    pub async fn handle(&self, cmd: &IncomingCommand) -> String {
        let tenant = &cmd.tenant;
        if let Err(e) = self.store.ensure_tenant(tenant).await {
            error!(tenant = %tenant, "Failed to register tenant: {e}");
        }

        let result = match Command::parse(cmd) {
            Ok(command) => {
                info!(tenant = %tenant, command = %cmd.name, "Handling command");
                self.execute(tenant, command).await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(reply) => reply,
            Err(Error::Validation(e)) => {
                warn!(tenant = %tenant, command = %cmd.name, "Command rejected: {e}");
                format!("❌ {}", escape_html(&e.to_string()))
            }
            Err(e) => {
                error!(tenant = %tenant, command = %cmd.name, "Command failed: {e}");
                "⚠️ Could not save the change, please try again.".to_string()
            }
        }
    }

    async fn execute(&self, tenant: &TenantId, command: Command) -> Result<String, Error> {
        match command {
            Command::Add {
                words,
                include,
                exclude,
                reset,
            } => {
                let lines = self
                    .store
                    .mutate(tenant, |rules| {
                        let mut lines = Vec::with_capacity(words.len());
                        for word in &words {
                            if is_blocked(rules, word) {
                                lines.push(format!(
                                    "⚠️ <b>{}</b> is globally blocked, skipped",
                                    escape_html(word)
                                ));
                                continue;
                            }
                            let change = rules.add_or_merge_rule(word, &include, &exclude, reset)?;
                            let verb = match change {
                                RuleChange::Created => "Added",
                                RuleChange::Updated => "Updated",
                            };
                            let detail = rules
                                .rule(word)
                                .map(|r| describe_terms(r.include_terms(), r.exclude_terms()))
                                .unwrap_or_default();
                            lines.push(format!("✅ {verb} <b>{}</b>{detail}", escape_html(word)));
                        }
                        Ok(lines)
                    })
                    .await?;
                Ok(lines.join("\n"))
            }

            Command::Delete(words) => {
                let deleted = self
                    .store
                    .mutate(tenant, |rules| {
                        Ok(words
                            .iter()
                            .filter(|w| rules.delete_rule(w))
                            .cloned()
                            .collect::<Vec<_>>())
                    })
                    .await?;
                if deleted.is_empty() {
                    Ok("❓ No matching rules".to_string())
                } else {
                    Ok(format!("🗑️ Deleted: {}", escape_html(&deleted.join(", "))))
                }
            }

            Command::List => Ok(render_list(&*self.store.snapshot(tenant).await)),

            Command::DefaultIncludes(terms) => {
                self.store
                    .mutate(tenant, |rules| {
                        rules.set_default_includes(&terms);
                        Ok(())
                    })
                    .await?;
                Ok(render_defaults("include", &terms))
            }

            Command::DefaultExcludes(terms) => {
                self.store
                    .mutate(tenant, |rules| {
                        rules.set_default_excludes(&terms);
                        Ok(())
                    })
                    .await?;
                Ok(render_defaults("exclude", &terms))
            }

            Command::Block(terms) => {
                let lines = self
                    .store
                    .mutate(tenant, |rules| {
                        Ok(terms
                            .iter()
                            .map(|term| {
                                let shown = escape_html(term);
                                if rules.rule(term).is_some() {
                                    format!("⚠️ <b>{shown}</b> is a monitored keyword, not blocked")
                                } else if rules.block_global(term) {
                                    format!("🚫 Blocked <b>{shown}</b>")
                                } else {
                                    format!("ℹ️ <b>{shown}</b> is already blocked")
                                }
                            })
                            .collect::<Vec<_>>())
                    })
                    .await?;
                Ok(lines.join("\n"))
            }

            Command::Unblock(terms) => {
                let removed = self
                    .store
                    .mutate(tenant, |rules| {
                        Ok(terms
                            .iter()
                            .filter(|t| rules.unblock_global(t))
                            .cloned()
                            .collect::<Vec<_>>())
                    })
                    .await?;
                if removed.is_empty() {
                    Ok("❓ No matching block terms".to_string())
                } else {
                    Ok(format!("🗑️ Unblocked: {}", escape_html(&removed.join(", "))))
                }
            }

            Command::BlockList => Ok(render_blocklist(&*self.store.snapshot(tenant).await)),

            Command::SetSummary(on) => {
                self.store.set_setting(tenant, Setting::MatchSummary(on)).await?;
                Ok(format!("🔎 Summary matching {}", on_off(on)))
            }

            Command::SetFullWord(on) => {
                self.store.set_setting(tenant, Setting::FullWordMatch(on)).await?;
                Ok(format!("🧩 Full-word matching {}", on_off(on)))
            }

            Command::SetRegex(on) => {
                self.store.set_setting(tenant, Setting::RegexMatch(on)).await?;
                let mut reply = format!("🧠 Regex matching {}", on_off(on));
                let invalid = self.store.snapshot(tenant).await.invalid_terms();
                if !invalid.is_empty() {
                    let terms: Vec<_> = invalid.iter().map(|t| t.term.as_str()).collect();
                    reply.push_str(&format!(
                        "\n⚠️ Invalid patterns ignored: {}",
                        escape_html(&terms.join(", "))
                    ));
                }
                Ok(reply)
            }

            Command::SetInterval { min, max } => {
                if self.admin.as_ref() != Some(tenant) {
                    return Err(ValidationError::NotPermitted(
                        "only the admin chat can change the polling interval".into(),
                    )
                    .into());
                }
                self.store
                    .set_setting(tenant, Setting::Interval { min, max })
                    .await?;
                Ok(format!("⏱️ Polling interval set to <b>{min}-{max}</b> seconds"))
            }

            Command::SetNotifyLimit(limit) => {
                self.store
                    .set_setting(tenant, Setting::MaxNotifiedEntries(limit))
                    .await?;
                Ok(format!("📦 Dedup history limit set to <b>{limit}</b>"))
            }

            Command::Status => Ok(self.render_status(tenant).await),

            Command::Help => Ok(HELP.to_string()),

            Command::Unknown(name) => Ok(format!(
                "❓ Unknown command /{}. Send /help for the list.",
                escape_html(&name)
            )),
        }
    }

    async fn render_status(&self, tenant: &TenantId) -> String {
        let rules = self.store.snapshot(tenant).await;
        let settings = rules.settings();
        let (min, max) = match &self.admin {
            Some(admin) => self.store.snapshot(admin).await.settings().effective_interval(),
            None => settings.effective_interval(),
        };
        let stats = self.stats.snapshot().await;
        let memory = match self.memory.resident_bytes().await {
            Some(bytes) => format!("{:.1} MB", bytes as f64 / MIB as f64),
            None => "unknown".to_string(),
        };
        let last_check = stats
            .last_check
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let last_error = stats
            .last_error
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| "none".to_string());

        format!(
            "<b>📊 Status</b>\n\
             • Uptime: {}\n\
             • Memory: {memory}\n\
             • Rules: {}, global blocks: {}\n\
             • Last check: {last_check}\n\
             • Last error: {last_error}\n\
             • Interval: {min}-{max} s\n\
             • Matching: summary={}, full-word={}, regex={}, history={}\n\
             • Restart policy: {}\n\
             • Cycles completed: {}",
            format_uptime(stats.uptime()),
            rules.rule_count(),
            rules.global_exclude().len(),
            on_off(settings.match_summary),
            on_off(settings.full_word_match),
            on_off(settings.regex_match),
            settings.max_notified_entries,
            self.restart_policy,
            stats.cycle_count,
        )
    }
}

fn is_blocked(rules: &RuleSet, word: &str) -> bool {
    let term = Term::new(word);
    rules.global_exclude().iter().any(|t| *t == term)
}

fn describe_terms(include: &[Term], exclude: &[Term]) -> String {
    let mut out = String::new();
    if !include.is_empty() {
        out.push_str(&format!(" ➕ {}", join_terms(include)));
    }
    if !exclude.is_empty() {
        out.push_str(&format!(" ⛔ {}", join_terms(exclude)));
    }
    out
}

fn join_terms(terms: &[Term]) -> String {
    let texts: Vec<_> = terms.iter().map(Term::text).collect();
    escape_html(&texts.join(", "))
}

fn render_list(rules: &RuleSet) -> String {
    let mut lines = vec!["<b>📋 Your rules</b>".to_string()];
    let defaults = rules.defaults();
    if !defaults.include.is_empty() || !defaults.exclude.is_empty() {
        lines.push(format!(
            "<i>Defaults:</i>{}",
            describe_terms(&defaults.include, &defaults.exclude)
        ));
    }
    if rules.rule_count() == 0 {
        lines.push("(no rules)".to_string());
    }
    for (i, rule) in rules.rules().enumerate() {
        let inactive = if rule.word_term().is_active() {
            ""
        } else {
            " (invalid pattern)"
        };
        lines.push(format!(
            "{}. <b>{}</b>{}{inactive}",
            i + 1,
            escape_html(rule.word()),
            describe_terms(rule.include_terms(), rule.exclude_terms())
        ));
    }
    if !rules.global_exclude().is_empty() {
        lines.push(format!("<i>Global blocks:</i> {}", join_terms(rules.global_exclude())));
    }
    lines.join("\n")
}

fn render_blocklist(rules: &RuleSet) -> String {
    if rules.global_exclude().is_empty() {
        return "🚫 No global blocks".to_string();
    }
    let mut lines = vec!["<b>🚫 Global blocks</b>".to_string()];
    for (i, term) in rules.global_exclude().iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, escape_html(term.text())));
    }
    lines.join("\n")
}

fn render_defaults(kind: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        format!("🧹 Default {kind} terms cleared")
    } else {
        format!(
            "📝 Default {kind} terms: {}",
            escape_html(&terms.join(", "))
        )
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) =
        (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}
