use std::fmt;

use serde::Serialize;

use crate::ledger::{BallotLedger, CandidateIndex, VoteCount};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ResultRow {
    pub index: CandidateIndex,
    pub name: String,
    pub votes: VoteCount,
    /// Share of all votes, rounded to one decimal place.
    pub percent: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Results {
    pub ballot_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub total_votes: VoteCount,
    pub rows: Vec<ResultRow>,
    /// Candidates sharing the highest count; empty until the first vote.
    pub leaders: Vec<CandidateIndex>,
    pub tally_root: String,
}

impl Results {
    pub fn from_ledger(ledger: &BallotLedger, title: Option<String>) -> Self {
        let total_votes = ledger.total_votes();
        let rows: Vec<ResultRow> = ledger
            .candidates()
            .iter()
            .enumerate()
            .map(|(index, c)| ResultRow {
                index: index as CandidateIndex,
                name: c.name.clone(),
                votes: c.vote_count,
                percent: percent_of(c.vote_count, total_votes),
            })
            .collect();
        let top = rows.iter().map(|r| r.votes).max().unwrap_or(0);
        let leaders = if top == 0 {
            Vec::new()
        } else {
            rows.iter().filter(|r| r.votes == top).map(|r| r.index).collect()
        };
        Self {
            ballot_id: ledger.ballot_id_hex(),
            title,
            total_votes,
            rows,
            leaders,
            tally_root: hex::encode(ledger.tally_root()),
        }
    }
}

fn percent_of(votes: VoteCount, total: VoteCount) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (votes as f64 * 1000.0 / total as f64).round() / 10.0
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(title) = &self.title {
            writeln!(f, "{title}")?;
        }
        writeln!(f, "ballot {}", self.ballot_id)?;
        let width = self.rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
        for row in &self.rows {
            let mark = if self.leaders.contains(&row.index) { "*" } else { " " };
            writeln!(
                f,
                "{mark} [{:>2}] {:<width$}  {:>6}  {:>5.1}%",
                row.index, row.name, row.votes, row.percent
            )?;
        }
        writeln!(f, "Total votes: {}", self.total_votes)?;
        write!(f, "tally root {}", self.tally_root)
    }
}
