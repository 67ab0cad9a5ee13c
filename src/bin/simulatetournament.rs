//! Plays a tournament from registration to prize payout, with random
//! ratings, random verdicts and the occasional no-show. Handy for checking
//! a bracket by eye.

use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use clap::Parser;
use diesel::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rostrum::{
    clock::ManualClock,
    debates::{
        Debate,
        scheduler::Scheduler,
        statements::submit_statement,
        verdicts::{JudgeScore, VerdictInput, VerdictQueue, apply_verdict},
    },
    error::ArenaError,
    notify::{LogNotifier, LogUsageMeter},
    schema::tournament_matches,
    state::{DbPool, Services, make_pool},
    tournaments::{
        Position, Tournament, TournamentFormat,
        bracket::BracketMatch,
        create::{TournamentSettings, create_tournament},
        participants::{Participant, join_tournament},
    },
    users::User,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value_t = 8)]
    participants: i64,
    #[arg(long, default_value = "SINGLE_ELIMINATION")]
    format: TournamentFormat,
    #[arg(long, default_value_t = 1000)]
    prize_pool: i64,
    #[arg(long, default_value_t = 2)]
    debate_rounds: i64,
    /// Chance that a match is left to run out its deadline.
    #[arg(long, default_value_t = 0.1)]
    no_show: f64,
    /// Seeds the random choices, for a repeatable run.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = ":memory:")]
    database_url: String,
}

struct Sim {
    pool: DbPool,
    clock: Arc<ManualClock>,
    services: Services,
    rng: ChaCha20Rng,
}

impl Sim {
    fn open_matches(
        &self,
        tournament_id: &str,
    ) -> Result<Vec<BracketMatch>, ArenaError> {
        let mut conn = self.pool.get()?;
        Ok(tournament_matches::table
            .filter(tournament_matches::tournament_id.eq(tournament_id))
            .filter(tournament_matches::resolved_at.is_null())
            .order_by(tournament_matches::bracket_position.asc())
            .select(BracketMatch::as_select())
            .load(&mut conn)?)
    }

    fn debate(&self, debate_id: &str) -> Result<Debate, ArenaError> {
        let mut conn = self.pool.get()?;
        Debate::fetch(debate_id, &mut conn)
    }

    /// Both sides speak in every round, then a verdict is picked at random.
    fn play(&mut self, debate_id: &str) -> Result<(), ArenaError> {
        let debate = self.debate(debate_id)?;
        let Some(opponent) = debate.opponent_id.clone() else {
            return Ok(());
        };

        let mut conn = self.pool.get()?;
        for _ in 0..debate.total_rounds {
            for author in [&debate.challenger_id, &opponent] {
                submit_statement(
                    &mut conn,
                    &self.services,
                    debate_id,
                    author,
                    "Consider the evidence.",
                )?;
            }
        }

        let winner = if self.rng.random_bool(0.5) {
            debate.challenger_id.clone()
        } else {
            opponent
        };
        let (winning, losing) = (self.rng.random_range(6..=10), 5);
        let (challenger_score, opponent_score) =
            if winner == debate.challenger_id {
                (winning, losing)
            } else {
                (losing, winning)
            };

        apply_verdict(
            &mut conn,
            &self.services,
            debate_id,
            VerdictInput {
                winner_id: Some(winner.clone()),
                judges: vec![JudgeScore {
                    judge_name: "simulator".to_string(),
                    winner_id: Some(winner.clone()),
                    challenger_score,
                    opponent_score,
                    reasoning: "Chosen at random.".to_string(),
                }],
            },
        )?;
        println!("  {debate_id}: won by {winner}");
        Ok(())
    }
}

fn main() -> Result<(), ArenaError> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let rng = match args.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_os_rng(),
    };
    let start = NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap_or_default();
    let clock = Arc::new(ManualClock::new(start));
    // verdicts are supplied directly, so nobody listens for requests
    let (verdicts, _jobs) = VerdictQueue::channel();
    let services = Services {
        clock: clock.clone(),
        notifier: Arc::new(LogNotifier),
        meter: Arc::new(LogUsageMeter),
        verdicts,
    };
    let mut sim = Sim {
        pool: make_pool(&args.database_url, 1)?,
        clock,
        services,
        rng,
    };
    let no_show = args.no_show.clamp(0.0, 1.0);

    let users = (0..args.participants)
        .map(|i| {
            let elo = sim.rng.random_range(1000..2000);
            let mut conn = sim.pool.get()?;
            User::create(&format!("debater{i}"), elo, start, &mut conn)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let side = |i: usize| match args.format {
        TournamentFormat::Championship if i % 2 == 0 => Some(Position::Pro),
        TournamentFormat::Championship => Some(Position::Con),
        _ => None,
    };

    let tournament = {
        let mut conn = sim.pool.get()?;
        create_tournament(
            &mut conn,
            start,
            &users[0].id,
            TournamentSettings {
                name: format!("Simulated {}", args.format),
                format: args.format,
                max_participants: args.participants,
                min_elo: None,
                prize_pool: args.prize_pool,
                prize_distribution: None,
                is_private: false,
                invitees: vec![],
                debate_rounds: args.debate_rounds,
                round_duration_secs: 3600,
                creator_position: side(0),
            },
        )?
    };
    for (i, user) in users.iter().enumerate().skip(1) {
        let mut conn = sim.pool.get()?;
        join_tournament(
            &mut conn,
            &sim.services,
            &tournament.id,
            &user.id,
            side(i),
        )?;
    }

    let mut round = 0;
    loop {
        let open = sim.open_matches(&tournament.id)?;
        if open.is_empty() {
            break;
        }
        round += 1;
        println!("Round {round}: {} open matches", open.len());

        let mut absent = false;
        for m in &open {
            let Some(debate_id) = &m.debate_id else {
                continue;
            };
            if sim.rng.random_bool(no_show) {
                println!("  {debate_id}: nobody turned up");
                absent = true;
            } else {
                sim.play(debate_id)?;
            }
        }

        if absent {
            sim.clock.advance(TimeDelta::hours(args.debate_rounds + 1));
            Scheduler::new(sim.pool.clone(), sim.services.clone()).sweep()?;
        }
    }

    let mut conn = sim.pool.get()?;
    let tournament = Tournament::fetch(&tournament.id, &mut conn)?;
    println!(
        "{} is {} after {} rounds",
        tournament.name, tournament.status, tournament.current_round
    );
    for p in Participant::of_tournament(&tournament.id, &mut conn)? {
        let user = User::fetch(&p.user_id, &mut conn)?;
        println!(
            "  seed {:>2}  {:<10} {:>4} elo  {} wins  {} balance {}",
            p.seed,
            user.username,
            p.elo_at_start.unwrap_or(user.elo),
            p.wins,
            p.status,
            user.balance,
        );
    }

    Ok(())
}
