pub const MIN_APPEAL_REASON_CHARS: usize = 50;
pub const MAX_APPEAL_REASON_CHARS: usize = 1000;
pub const MAX_STATEMENT_CHARS: usize = 5000;
pub const MAX_DEBATE_ROUNDS: i64 = 10;
pub const MIN_ROUND_DURATION_SECS: i64 = 60;
pub const MAX_TOURNAMENT_PARTICIPANTS: i64 = 64;

/// Character (not byte) count, ignoring surrounding whitespace.
fn char_count(s: &str) -> usize {
    s.trim().chars().count()
}

pub fn is_valid_appeal_reason(reason: &str) -> Result<(), String> {
    let n = char_count(reason);
    if n < MIN_APPEAL_REASON_CHARS {
        Err(format!(
            "the appeal reason must be at least {MIN_APPEAL_REASON_CHARS} \
             characters long (it is {n})"
        ))
    } else if n > MAX_APPEAL_REASON_CHARS {
        Err(format!(
            "the appeal reason must be at most {MAX_APPEAL_REASON_CHARS} \
             characters long (it is {n})"
        ))
    } else {
        Ok(())
    }
}

pub fn is_valid_statement(content: &str) -> Result<(), String> {
    match char_count(content) {
        0 => Err("the statement must not be empty".to_string()),
        n if n > MAX_STATEMENT_CHARS => Err(format!(
            "the statement must be at most {MAX_STATEMENT_CHARS} characters \
             long (it is {n})"
        )),
        _ => Ok(()),
    }
}

pub fn is_valid_round_count(rounds: i64) -> Result<(), String> {
    match (1..=MAX_DEBATE_ROUNDS).contains(&rounds) {
        true => Ok(()),
        false => Err(format!(
            "a debate must have between 1 and {MAX_DEBATE_ROUNDS} rounds"
        )),
    }
}

pub fn is_valid_round_duration(secs: i64) -> Result<(), String> {
    match secs >= MIN_ROUND_DURATION_SECS {
        true => Ok(()),
        false => Err(format!(
            "rounds must last at least {MIN_ROUND_DURATION_SECS} seconds"
        )),
    }
}

pub fn is_valid_tournament_name(name: &str) -> Result<(), String> {
    match (4..=64).contains(&char_count(name)) {
        true => Ok(()),
        false => Err(
            "the tournament name must be between 4 and 64 characters"
                .to_string(),
        ),
    }
}

pub fn is_valid_participant_limit(
    max: i64,
    needs_even: bool,
) -> Result<(), String> {
    if !(2..=MAX_TOURNAMENT_PARTICIPANTS).contains(&max) {
        return Err(format!(
            "a tournament must allow between 2 and \
             {MAX_TOURNAMENT_PARTICIPANTS} participants"
        ));
    }
    if needs_even && max % 2 != 0 {
        return Err(
            "this format needs an even number of participants".to_string()
        );
    }
    Ok(())
}
