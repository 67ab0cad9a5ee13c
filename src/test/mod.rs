//! Scenario tests, run against an in-memory database.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use diesel::SqliteConnection;

use crate::{
    clock::ManualClock,
    debates::{
        Debate, NewDebate, accept_debate, create_debate,
        statements::submit_statement,
        verdicts::{
            JudgeScore, VerdictInput, VerdictJob, VerdictJobs, VerdictQueue,
        },
    },
    notify::{
        Notification, NotificationKind, Notifier, NotifyError, UsageError,
        UsageMeter,
    },
    state::{DbPool, Services, make_pool},
    users::User,
};

mod appeals;
mod tournaments;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    /// Deliveries to these users fail.
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.kind == kind).collect()
    }

    pub fn make_unreachable(&self, user_id: &str) {
        self.unreachable.lock().unwrap().insert(user_id.to_string());
    }

    pub fn make_reachable(&self, user_id: &str) {
        self.unreachable.lock().unwrap().remove(user_id);
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.unreachable.lock().unwrap().contains(&notification.user_id) {
            return Err(NotifyError(format!(
                "{} is unreachable",
                notification.user_id
            )));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMeter {
    pub recorded: Mutex<Vec<(String, String)>>,
}

impl UsageMeter for RecordingMeter {
    fn record_usage(
        &self,
        user_id: &str,
        feature_key: &str,
    ) -> Result<(), UsageError> {
        self.recorded
            .lock()
            .unwrap()
            .push((user_id.to_string(), feature_key.to_string()));
        Ok(())
    }
}

pub fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub struct Harness {
    pub pool: DbPool,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub meter: Arc<RecordingMeter>,
    pub services: Services,
    pub jobs: VerdictJobs,
}

impl Harness {
    pub fn new() -> Self {
        let pool = make_pool(":memory:", 1).unwrap();
        let clock = Arc::new(ManualClock::new(start_time()));
        let notifier = Arc::new(RecordingNotifier::default());
        let meter = Arc::new(RecordingMeter::default());
        let (verdicts, jobs) = VerdictQueue::channel();

        let services = Services {
            clock: clock.clone(),
            notifier: notifier.clone(),
            meter: meter.clone(),
            verdicts,
        };

        Self {
            pool,
            clock,
            notifier,
            meter,
            services,
            jobs,
        }
    }

    /// Runs `f` with the (only) pooled connection. The connection is given
    /// back before this returns, so the scheduler can take it afterwards.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut SqliteConnection) -> T,
    ) -> T {
        let mut conn = self.pool.get().unwrap();
        f(&mut *conn)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.services.now()
    }

    pub fn advance_clock(&self, by: TimeDelta) {
        self.clock.advance(by);
    }

    pub fn user(&self, username: &str, elo: i64) -> User {
        self.with_conn(|conn| User::create(username, elo, self.now(), conn))
            .unwrap()
    }

    pub fn debate(&self, debate_id: &str) -> Debate {
        self.with_conn(|conn| Debate::fetch(debate_id, conn)).unwrap()
    }

    /// Every verdict job queued so far.
    pub fn queued_jobs(&mut self) -> Vec<VerdictJob> {
        std::iter::from_fn(|| self.jobs.try_recv()).collect()
    }

    /// An active debate between two fresh users, one hour per round.
    pub fn active_debate(&self, total_rounds: i64) -> (Debate, User, User) {
        let a = self.user(&format!("a{}", uuid::Uuid::now_v7()), 1200);
        let b = self.user(&format!("b{}", uuid::Uuid::now_v7()), 1200);

        let debate = self
            .with_conn(|conn| {
                let debate = create_debate(
                    conn,
                    self.now(),
                    NewDebate {
                        challenger_id: a.id.clone(),
                        opponent_id: None,
                        topic: "Rust is a good first language".to_string(),
                        category: "technology".to_string(),
                        total_rounds,
                        round_duration_secs: 3600,
                        tournament_match_id: None,
                    },
                )?;
                accept_debate(conn, self.now(), &debate.id, &b.id)
            })
            .unwrap();

        (debate, a, b)
    }

    pub fn say(&self, debate_id: &str, author_id: &str) {
        self.with_conn(|conn| {
            submit_statement(
                conn,
                &self.services,
                debate_id,
                author_id,
                "I maintain my position, for the reasons given.",
            )
        })
        .unwrap();
    }
}

pub fn verdict(winner_id: Option<&str>) -> VerdictInput {
    VerdictInput {
        winner_id: winner_id.map(str::to_string),
        judges: vec![JudgeScore {
            judge_name: "judge".to_string(),
            winner_id: winner_id.map(str::to_string),
            challenger_score: 7,
            opponent_score: 5,
            reasoning: "Better rebuttals.".to_string(),
        }],
    }
}
