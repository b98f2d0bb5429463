use std::{
    env,
    io::{self, BufRead, Write},
    process::{Command as Process, Stdio},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context as _, anyhow, bail};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use ralendar::{
    calendar::Event,
    reminder::{LogNotifier, ReminderOutcome, ReminderScheduler, SystemClock, TokioAlarmScheduler},
    service::{CalendarService, ServiceOutcome},
    storage::{Config, Session, SessionStore, SqliteStore},
    sync::{
        BackendClient, DayHolidays, EventRepository, Holiday, HolidayList, LoginFlow, LoginState,
        SubscriptionManager,
    },
};

pub const USAGE: &str = "Usage: ralendar <command>

Commands:
  agenda [YYYY-MM-DD]                        Show one day
  add <title> <YYYY-MM-DDTHH:MM> [minutes]   Create an event with an optional reminder
  move <id> <YYYY-MM-DDTHH:MM>               Move an event to a new start time
  delete <id>                                Delete an event
  login | logout | whoami                    Manage the cloud account
  cloud on|off                               Store events in the cloud or locally
  lunar [YYYY-MM-DD]                         Show the lunar date
  holidays [YEAR]                            List public holidays of a year
  holiday [YYYY-MM-DD]                       Show holidays and festivals on a day
  quick <text>                               Create an event from a sentence (cloud login)
  subscribe <name> <slug-or-url>             Subscribe to a calendar feed
  unsubscribe <id>                           Remove a subscription and its events
  subscriptions                              List subscriptions
  sync                                       Refresh every enabled subscription
  watch                                      Keep running and deliver reminders

Reminders are delivered only while 'watch' runs. It picks up events
added, moved or deleted by other commands.";

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Agenda(Option<NaiveDate>),
    Add {
        title: String,
        start: NaiveDateTime,
        reminder_minutes: Option<u32>,
    },
    Move {
        id: i64,
        start: NaiveDateTime,
    },
    Delete(i64),
    Login,
    Logout,
    Whoami,
    Cloud(bool),
    Lunar(Option<NaiveDate>),
    Holidays(Option<i32>),
    Holiday(Option<NaiveDate>),
    Quick(String),
    Subscribe {
        name: String,
        source: String,
    },
    Unsubscribe(i64),
    Subscriptions,
    Sync,
    Watch,
    Help,
}

pub fn parse_command(args: impl IntoIterator<Item = String>) -> Result<CliCommand, String> {
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(CliCommand::Agenda(None));
    };
    let rest: Vec<String> = args.collect();
    let arg = |index: usize, name: &str| {
        rest.get(index)
            .cloned()
            .ok_or_else(|| format!("Missing argument <{}> for '{}'", name, command))
    };

    let parsed = match command.as_str() {
        "agenda" => CliCommand::Agenda(rest.first().map(|d| parse_date(d)).transpose()?),
        "add" => CliCommand::Add {
            title: arg(0, "title")?,
            start: parse_start(&arg(1, "start")?)?,
            reminder_minutes: rest
                .get(2)
                .map(|m| {
                    m.parse::<u32>()
                        .map_err(|_| format!("Invalid reminder minutes '{}'", m))
                })
                .transpose()?,
        },
        "move" => CliCommand::Move {
            id: parse_id(&arg(0, "id")?)?,
            start: parse_start(&arg(1, "start")?)?,
        },
        "delete" => CliCommand::Delete(parse_id(&arg(0, "id")?)?),
        "login" => CliCommand::Login,
        "logout" => CliCommand::Logout,
        "whoami" => CliCommand::Whoami,
        "cloud" => match arg(0, "on|off")?.as_str() {
            "on" => CliCommand::Cloud(true),
            "off" => CliCommand::Cloud(false),
            other => return Err(format!("Expected 'on' or 'off', got '{}'", other)),
        },
        "lunar" => CliCommand::Lunar(rest.first().map(|d| parse_date(d)).transpose()?),
        "holidays" => CliCommand::Holidays(
            rest.first()
                .map(|y| y.parse::<i32>().map_err(|_| format!("Invalid year '{}'", y)))
                .transpose()?,
        ),
        "holiday" => CliCommand::Holiday(rest.first().map(|d| parse_date(d)).transpose()?),
        "quick" => {
            let text = rest.join(" ");
            if text.trim().is_empty() {
                return Err("Missing argument <text> for 'quick'".to_string());
            }
            CliCommand::Quick(text)
        }
        "subscribe" => CliCommand::Subscribe {
            name: arg(0, "name")?,
            source: arg(1, "slug-or-url")?,
        },
        "unsubscribe" => CliCommand::Unsubscribe(parse_id(&arg(0, "id")?)?),
        "subscriptions" => CliCommand::Subscriptions,
        "sync" => CliCommand::Sync,
        "watch" => CliCommand::Watch,
        "help" | "--help" | "-h" => CliCommand::Help,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(parsed)
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD.", value))
}

fn parse_start(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M"))
        .map_err(|_| format!("Invalid start '{}'. Use YYYY-MM-DDTHH:MM.", value))
}

fn parse_id(value: &str) -> Result<i64, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid event id '{}'", value))
}

/// Everything a command needs, wired from the configuration.
struct Context {
    config: Config,
    offset: FixedOffset,
    session_store: SessionStore,
    session: Session,
    client: Arc<BackendClient>,
    subscriptions: Arc<SubscriptionManager>,
    service: CalendarService,
}

impl Context {
    fn build(config: Config) -> anyhow::Result<Self> {
        let offset = config.calendar.offset();
        let session_store = SessionStore::new(config.storage.session_path.clone());
        let session = session_store.load().context("Failed to load session")?;

        let store = Arc::new(
            SqliteStore::open(&config.storage.database_path)
                .context("Failed to open event database")?,
        );
        let client = Arc::new(BackendClient::new(config.server.base_url.clone()).with_offset(offset));
        let subscriptions = Arc::new(SubscriptionManager::new(store.clone(), client.clone(), offset));
        let repository = Arc::new(EventRepository::new(
            store,
            client.clone(),
            subscriptions.clone(),
            offset,
        ));

        let alarms = TokioAlarmScheduler::new(Arc::new(LogNotifier))
            .with_exact_alarms(config.reminders.exact_alarms);
        let reminders = ReminderScheduler::new(Arc::new(alarms), Arc::new(SystemClock));

        Ok(Self {
            config,
            offset,
            session_store,
            session,
            client,
            subscriptions,
            service: CalendarService::new(repository, reminders),
        })
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    fn to_utc(&self, local: NaiveDateTime) -> anyhow::Result<chrono::DateTime<Utc>> {
        local
            .and_local_timezone(self.offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| anyhow!("Start time {} does not exist", local))
    }

    async fn find_event(&self, id: i64) -> anyhow::Result<Event> {
        self.service
            .all_events(&self.session)
            .await?
            .into_iter()
            .find(|event| event.id == Some(id) && !event.is_read_only())
            .ok_or_else(|| anyhow!("No editable event with id {}", id))
    }

    fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(
            self.client.clone(),
            self.config.server.oauth_provider.clone(),
            self.config.server.callback_prefix.clone(),
        )
        .resume(&self.session)
    }
}

pub async fn run_command(command: CliCommand, config: Config) -> anyhow::Result<()> {
    if command == CliCommand::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut ctx = Context::build(config)?;

    match command {
        CliCommand::Agenda(date) => {
            let date = date.unwrap_or_else(|| ctx.today());
            let events = ctx.service.events_for_date(&ctx.session, date).await?;
            display_with_pager(&format_agenda_text(date, &events, ctx.offset))?;
        }
        CliCommand::Add {
            title,
            start,
            reminder_minutes,
        } => {
            let event = Event::new(title, ctx.to_utc(start)?).with_reminder(
                reminder_minutes.unwrap_or(ctx.config.calendar.default_reminder_minutes),
            );
            let outcome = ctx.service.create(&ctx.session, &event).await?;
            report_mutation("Created", &outcome, ctx.offset);
        }
        CliCommand::Move { id, start } => {
            let mut event = ctx.find_event(id).await?;
            let duration = event.end.map(|end| end - event.start);
            event.start = ctx.to_utc(start)?;
            event.end = duration.map(|d| event.start + d);
            let outcome = ctx.service.update(&ctx.session, &event).await?;
            report_mutation("Moved", &outcome, ctx.offset);
        }
        CliCommand::Delete(id) => {
            let event = ctx.find_event(id).await?;
            let outcome = ctx.service.delete(&ctx.session, &event).await?;
            report_mutation("Deleted", &outcome, ctx.offset);
        }
        CliCommand::Login => login(&mut ctx).await?,
        CliCommand::Logout => {
            let mut flow = ctx.login_flow();
            flow.logout(&mut ctx.session, &ctx.session_store)?;
            println!("Logged out. Events are stored locally.");
        }
        CliCommand::Whoami => {
            if !ctx.session.is_logged_in() {
                println!("Not logged in.");
                return Ok(());
            }
            let profile = ctx.login_flow().verify(&ctx.session).await?;
            let mode = if ctx.session.uses_cloud() { "cloud" } else { "local" };
            println!("{} (id {}), {} mode", profile.username, profile.id, mode);
        }
        CliCommand::Cloud(enabled) => {
            if enabled && !ctx.session.is_logged_in() {
                bail!("Log in before enabling cloud mode");
            }
            ctx.session.cloud_mode = enabled;
            ctx.session_store.save(&ctx.session)?;
            println!("Cloud mode {}", if enabled { "on" } else { "off" });
        }
        CliCommand::Lunar(date) => {
            let date = date.unwrap_or_else(|| ctx.today());
            let lunar = ctx.client.lunar_date(date).await?;
            println!(
                "{}: {} ({}, year of the {})",
                lunar.solar_date, lunar.lunar_date, lunar.year, lunar.zodiac
            );
        }
        CliCommand::Holidays(year) => {
            let year = year.unwrap_or_else(|| ctx.today().year());
            let list = ctx.client.holidays(year).await?;
            println!("{}", format_holiday_list(&list));
        }
        CliCommand::Holiday(date) => {
            let day = match date {
                Some(date) => ctx.client.check_holiday(date).await?,
                None => ctx.client.today_holidays().await?,
            };
            println!("{}", format_day_holidays(&day));
        }
        CliCommand::Quick(text) => {
            let token = ctx
                .session
                .bearer()
                .ok_or_else(|| anyhow!("Log in to create events from text"))?;
            let parsed = ctx.client.parse_event_text(token, &text).await?;
            let event = parsed.to_event(ctx.offset, ctx.config.calendar.default_reminder_minutes)?;
            let outcome = ctx.service.create(&ctx.session, &event).await?;
            report_mutation("Created", &outcome, ctx.offset);
        }
        CliCommand::Subscribe { name, source } => {
            let subscription = ctx.subscriptions.add(&name, &source)?;
            match ctx.subscriptions.sync(subscription.id).await {
                Ok(count) => println!("Subscribed to {} ({} events)", subscription.name, count),
                Err(e) => println!(
                    "Subscribed to {}, but the first sync failed: {}",
                    subscription.name, e
                ),
            }
        }
        CliCommand::Unsubscribe(id) => {
            ctx.subscriptions.remove(id)?;
            println!("Removed subscription {}", id);
        }
        CliCommand::Subscriptions => {
            let subscriptions = ctx.subscriptions.list()?;
            if subscriptions.is_empty() {
                println!("No subscriptions.");
            }
            for s in subscriptions {
                let state = if s.enabled { "" } else { " (disabled)" };
                println!("[{}] {} <{}>{}", s.id, s.name, s.source, state);
            }
        }
        CliCommand::Sync => {
            let report = ctx.subscriptions.sync_all().await?;
            for (id, count) in &report.synced {
                println!("Subscription {}: {} events", id, count);
            }
            for (id, reason) in &report.failed {
                println!("Subscription {} failed: {}", id, reason);
            }
        }
        CliCommand::Watch => watch(&mut ctx).await?,
        CliCommand::Help => println!("{}", USAGE),
    }

    Ok(())
}

async fn watch(ctx: &mut Context) -> anyhow::Result<()> {
    let period = Duration::from_secs(ctx.config.reminders.poll_seconds.max(1));
    let mut refresh = tokio::time::interval(period);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!("Watching reminders. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = refresh.tick() => {
                // Login, logout and cloud toggles happen in other invocations.
                match ctx.session_store.load() {
                    Ok(session) => ctx.session = session,
                    Err(e) => tracing::warn!("Keeping previous session: {}", e),
                }
                match ctx.service.reconcile_reminders(&ctx.session).await {
                    Ok(report) if report.scheduled + report.cancelled > 0 => println!(
                        "Reminders updated: {} scheduled, {} cancelled, {} pending",
                        report.scheduled,
                        report.cancelled,
                        report.scheduled + report.unchanged
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Could not refresh reminders, keeping current ones: {}", e),
                }
            }
        }
    }

    tracing::info!("Stopped watching reminders");
    Ok(())
}

async fn login(ctx: &mut Context) -> anyhow::Result<()> {
    let mut flow = ctx.login_flow();
    if flow.state() == &LoginState::LoggedIn {
        println!("Already logged in. Run 'ralendar logout' first to switch accounts.");
        return Ok(());
    }

    let authorize_url = flow.start().await?;
    println!("Open this page and sign in:\n\n  {}\n", authorize_url);
    flow.redirect_opened()?;

    print!("Paste the URL you were redirected to: ");
    io::stdout().flush()?;
    let mut callback = String::new();
    io::stdin().lock().read_line(&mut callback)?;
    let callback = callback.trim();

    if !flow.intercepts(callback) {
        bail!("'{}' is not a login callback URL", callback);
    }
    flow.complete(callback, &mut ctx.session, &ctx.session_store)
        .await?;

    let name = ctx
        .session
        .user
        .as_ref()
        .map(|u| u.username.clone())
        .unwrap_or_else(|| "unknown user".to_string());
    println!("Logged in as {}. Run 'ralendar cloud on' to store events in the cloud.", name);
    Ok(())
}

fn report_mutation(verb: &str, outcome: &ServiceOutcome, offset: FixedOffset) {
    let event = &outcome.reload.event;
    println!(
        "{} '{}' on {}",
        verb,
        event.title,
        event.start.with_timezone(&offset).format("%Y-%m-%d %H:%M")
    );
    if let Some(message) = describe_reminder(&outcome.reminder, offset) {
        println!("{}", message);
    }
}

fn describe_reminder(outcome: &ReminderOutcome, offset: FixedOffset) -> Option<String> {
    match outcome {
        ReminderOutcome::NotRequested => None,
        ReminderOutcome::Scheduled { fire_time } => Some(format!(
            "Reminder due at {}; it is delivered while 'ralendar watch' is running.",
            fire_time.with_timezone(&offset).format("%H:%M")
        )),
        ReminderOutcome::Elapsed { .. } => {
            Some("Reminder time has already passed; no reminder set.".to_string())
        }
        ReminderOutcome::Degraded { reason } => {
            Some(format!("Event saved, but the reminder could not be set: {}", reason))
        }
    }
}

fn format_holiday_list(list: &HolidayList) -> String {
    let mut lines = vec![format!("Holidays in {}", list.year), String::new()];
    if list.holidays.is_empty() {
        lines.push(
            list.message
                .clone()
                .unwrap_or_else(|| "No holidays listed.".to_string()),
        );
    }
    for holiday in &list.holidays {
        lines.push(match holiday {
            Holiday::Major { name, date } => format!("- {}  {}", date.format("%m-%d"), name),
            Holiday::Vacation {
                name,
                start_date,
                end_date,
                days,
            } => format!(
                "- {} to {}  {} ({} days)",
                start_date.format("%m-%d"),
                end_date.format("%m-%d"),
                name,
                days
            ),
        });
    }
    lines.join("\n")
}

fn format_day_holidays(day: &DayHolidays) -> String {
    let mut lines = vec![day.date.format("%Y-%m-%d").to_string()];
    if day.is_ordinary() {
        lines.push("No holidays or festivals.".to_string());
    }
    if let Some(name) = day.holiday.as_ref().and_then(|h| h.holiday_name.as_ref()) {
        lines.push(format!("Public holiday: {}", name));
    }
    for festival in day
        .traditional_festivals
        .iter()
        .chain(&day.international_festivals)
    {
        lines.push(format!("{} {}", festival.emoji, festival.name).trim().to_string());
    }
    lines.join("\n")
}

fn format_agenda_text(date: NaiveDate, events: &[Event], offset: FixedOffset) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Agenda – {}", date.format("%A, %B %d, %Y")));
    lines.push(String::new());

    if events.is_empty() {
        lines.push("No events scheduled.".to_string());
    } else {
        for event in events {
            lines.push(format!("- {}", build_agenda_line(event, offset)));
        }
    }

    lines.join("\n")
}

fn build_agenda_line(event: &Event, offset: FixedOffset) -> String {
    let start_local = event.start.with_timezone(&offset);
    let time_label = match event.end {
        Some(end) if end > event.start => format!(
            "{}-{}",
            start_local.format("%H:%M"),
            end.with_timezone(&offset).format("%H:%M")
        ),
        _ => start_local.format("%H:%M").to_string(),
    };

    let id_label = match (event.id, event.is_read_only()) {
        (_, true) => "[sub]".to_string(),
        (Some(id), false) => format!("[{}]", id),
        (None, false) => String::new(),
    };

    let mut line = format!("{:<13} {:<6} {}", time_label, id_label, event.title);
    if let Some(location) = &event.location
        && !location.name.is_empty()
    {
        line.push_str(&format!(" @ {}", location.name));
    }
    line
}

fn display_with_pager(text: &str) -> Result<(), io::Error> {
    let pager_value = env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager_value.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => {
            println!("{text}");
            return Ok(());
        }
    };
    let args: Vec<&str> = parts.collect();

    match Process::new(cmd).args(&args).stdin(Stdio::piped()).spawn() {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(text.as_bytes())?;
            }
            drop(child.stdin.take());
            let _ = child.wait();
        }
        Err(_) => {
            println!("{text}");
        }
    }

    Ok(())
}
