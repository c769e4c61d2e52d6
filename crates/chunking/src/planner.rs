//! The chunk planner: one outbound payload under a hard character budget.
//!
//! # Algorithm
//!
//! 1. Overhead = system instructions + request payload + chunk frame
//!    (section headers and directive). Overhead above the hard limit is a
//!    [`PlanError::BudgetExceeded`].
//! 2. Carried-forward decisions fill the decision sub-budget newest first;
//!    the oldest are dropped.
//! 3. Outstanding questions fill the question sub-budget in the order they
//!    were raised; the rest are deferred.
//! 4. Facts fill what remains, highest rank first, stopping at the first
//!    fact that does not fit. A fact too large for an otherwise empty chunk
//!    is reported as oversized and skipped.
//!
//! Sizes are measured on the rendered lines themselves, so the composed
//! payload is never longer than the hard limit.
//!
//! # Determinism
//!
//! Identical inputs always produce identical payloads.

use crate::size::{chars, decision_line, fact_line, question_line};
use lorekeep_core::{Decision, Fact, Proposal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

const REQUEST_HEADER: &str = "\n\n[Request]\n";
const DECISIONS_HEADER: &str = "\n[Decisions]\n";
const QUESTIONS_HEADER: &str = "\n[Open Questions]\n";
const FACTS_HEADER: &str = "\n[Facts]\n";

/// Instructions repeated in every chunk.
pub const DIRECTIVE: &str = "Resolve every open question listed below before raising new ones, and \
report each resolution under \"decisions\". Do not raise questions about topics already decided. \
Cite facts by id in \"sourcesUsed\". Reply with a single JSON object: the entity fields plus \
\"sourcesUsed\", \"assumptions\", \"proposals\", \"canonChange\" and \"decisions\".\n";

fn chunk_header(chunk: usize) -> String {
    format!("\n\n[Chunk {}]\n", chunk + 1)
}

/// Character budget for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBudget {
    /// Hard limit on the whole payload.
    pub hard_limit: usize,
    /// Cap on carried-forward decisions.
    pub decision_budget: usize,
    /// Cap on outstanding questions.
    pub question_budget: usize,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            hard_limit: 8000,
            decision_budget: 800,
            question_budget: 600,
        }
    }
}

/// Everything one exchange could carry.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub system: &'a str,
    /// The base request, rendered as compact JSON.
    pub base: &'a Value,
    /// Candidate facts; filled in rank order.
    pub facts: &'a [Fact],
    /// Decisions so far, oldest first.
    pub decisions: &'a [Decision],
    /// Outstanding questions, first raised first.
    pub questions: &'a [Proposal],
    /// Zero-based chunk index.
    pub chunk: usize,
}

/// Size accounting for one payload section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionStats {
    pub name: String,
    pub chars: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Material a section could not carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub section: String,
    pub items_dropped: usize,
    pub chars_dropped: usize,
    pub reason: String,
}

/// What did not go into this chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualPlan {
    /// Facts for later chunks, in rank order.
    pub facts: Vec<Fact>,
    /// Decisions that no longer fit the decision sub-budget.
    pub decisions_dropped: Vec<Decision>,
    /// Questions left out of this chunk; still outstanding.
    pub questions_deferred: Vec<Proposal>,
    /// Facts too large for any chunk; skipped.
    pub oversized: Vec<Fact>,
}

/// A composed exchange payload plus its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk: usize,
    pub payload: String,
    pub total_chars: usize,
    pub hard_limit: usize,
    /// Ids of the facts in this payload, in payload order.
    pub included: Vec<String>,
    /// How many candidate facts this chunk used up (included or oversized).
    pub consumed: usize,
    pub sections: Vec<SectionStats>,
    pub drops: Vec<DropInfo>,
    pub residual: ResidualPlan,
}

impl ChunkPlan {
    pub fn has_residual_facts(&self) -> bool {
        !self.residual.facts.is_empty()
    }
}

/// Why the fixed part of an exchange cannot fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetDiagnostic {
    /// Size of the fixed overhead.
    pub total: usize,
    pub hard_limit: usize,
    pub sections: Vec<SectionStats>,
    pub recommendation: String,
}

impl fmt::Display for BudgetDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fixed overhead of {} characters exceeds the hard limit of {} (",
            self.total, self.hard_limit
        )?;
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", section.name, section.chars)?;
        }
        write!(f, "); {}", self.recommendation)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Budget exceeded: {diagnostic}")]
    BudgetExceeded { diagnostic: BudgetDiagnostic },
}

/// The planner. Stateless; create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    budget: ChunkBudget,
}

impl ChunkPlanner {
    pub fn new(budget: ChunkBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> ChunkBudget {
        self.budget
    }

    /// Size of everything that is never trimmed, per section.
    fn fixed_sections(input: &PlanInput<'_>) -> Vec<(String, String)> {
        vec![
            ("system".to_string(), input.system.to_string()),
            (
                "request".to_string(),
                format!("{REQUEST_HEADER}{}", render_base(input.base)),
            ),
            (
                "frame".to_string(),
                format!(
                    "{}{DIRECTIVE}{DECISIONS_HEADER}{QUESTIONS_HEADER}{FACTS_HEADER}",
                    chunk_header(input.chunk)
                ),
            ),
        ]
    }

    /// Fixed overhead of an exchange, in characters.
    pub fn overhead(&self, input: &PlanInput<'_>) -> usize {
        Self::fixed_sections(input)
            .iter()
            .map(|(_, text)| chars(text))
            .sum()
    }

    /// Compose one payload.
    pub fn plan(&self, input: &PlanInput<'_>) -> Result<ChunkPlan, PlanError> {
        let limit = self.budget.hard_limit;
        let fixed = Self::fixed_sections(input);
        let overhead: usize = fixed.iter().map(|(_, text)| chars(text)).sum();

        if overhead > limit {
            return Err(PlanError::BudgetExceeded {
                diagnostic: diagnose(&fixed, overhead, limit),
            });
        }

        // The largest a single fact can be and still go out in some chunk.
        let empty_capacity = limit - overhead;

        let mut sections: Vec<SectionStats> = fixed
            .iter()
            .map(|(name, text)| SectionStats {
                name: name.clone(),
                chars: chars(text),
                items_included: 1,
                items_total: 1,
            })
            .collect();
        let mut drops = Vec::new();

        let mut facts = input.facts.to_vec();
        facts.sort_by(|a, b| b.rank.total_cmp(&a.rank));
        let fact_lines: Vec<String> = facts.iter().map(fact_line).collect();

        // ── Decisions: newest first within the sub-budget ─────────────────
        let decision_cap = self.budget.decision_budget.min(empty_capacity);
        let mut kept_decisions: Vec<usize> = Vec::new();
        let mut decision_chars = 0;
        for (i, decision) in input.decisions.iter().enumerate().rev() {
            let size = chars(&decision_line(decision));
            if decision_chars + size > decision_cap {
                break;
            }
            decision_chars += size;
            kept_decisions.push(i);
        }
        kept_decisions.reverse();

        // ── Questions: first raised first within the sub-budget ───────────
        let question_cap = self
            .budget
            .question_budget
            .min(empty_capacity - decision_chars);
        let mut kept_questions = 0;
        let mut question_chars = 0;
        for question in input.questions {
            let size = chars(&question_line(question));
            if question_chars + size > question_cap {
                break;
            }
            question_chars += size;
            kept_questions += 1;
        }

        // A fact that fits an empty chunk must always make progress: shed
        // carried-forward material until the first such fact fits.
        let first_fit = fact_lines
            .iter()
            .map(|line| chars(line))
            .find(|size| *size <= empty_capacity);
        if let Some(needed) = first_fit {
            while empty_capacity - decision_chars - question_chars < needed {
                if kept_questions > 0 {
                    kept_questions -= 1;
                    question_chars -= chars(&question_line(&input.questions[kept_questions]));
                } else if !kept_decisions.is_empty() {
                    let oldest = kept_decisions.remove(0);
                    decision_chars -= chars(&decision_line(&input.decisions[oldest]));
                } else {
                    break;
                }
            }
        }

        let oldest_kept = kept_decisions.first().copied().unwrap_or(input.decisions.len());
        let decisions_dropped: Vec<Decision> = input.decisions[..oldest_kept].to_vec();
        if !decisions_dropped.is_empty() {
            drops.push(DropInfo {
                section: "decisions".into(),
                items_dropped: decisions_dropped.len(),
                chars_dropped: decisions_dropped.iter().map(|d| chars(&decision_line(d))).sum(),
                reason: "Oldest decisions dropped".into(),
            });
        }
        let questions_deferred: Vec<Proposal> = input.questions[kept_questions..].to_vec();
        if !questions_deferred.is_empty() {
            drops.push(DropInfo {
                section: "questions".into(),
                items_dropped: questions_deferred.len(),
                chars_dropped: questions_deferred.iter().map(|q| chars(&question_line(q))).sum(),
                reason: "Latest questions deferred".into(),
            });
        }
        sections.push(SectionStats {
            name: "decisions".into(),
            chars: decision_chars,
            items_included: kept_decisions.len(),
            items_total: input.decisions.len(),
        });
        sections.push(SectionStats {
            name: "questions".into(),
            chars: question_chars,
            items_included: kept_questions,
            items_total: input.questions.len(),
        });

        // ── Facts: greedy in rank order ───────────────────────────────────
        let remaining = empty_capacity - decision_chars - question_chars;
        let mut used = 0;
        let mut included: Vec<usize> = Vec::new();
        let mut oversized: Vec<Fact> = Vec::new();
        let mut stop = facts.len();
        for (i, line) in fact_lines.iter().enumerate() {
            let size = chars(line);
            if size > empty_capacity {
                oversized.push(facts[i].clone());
                continue;
            }
            if used + size > remaining {
                stop = i;
                break;
            }
            used += size;
            included.push(i);
        }

        let deferred: Vec<Fact> = facts[stop..].to_vec();
        if !deferred.is_empty() {
            drops.push(DropInfo {
                section: "facts".into(),
                items_dropped: deferred.len(),
                chars_dropped: fact_lines[stop..].iter().map(|l| chars(l)).sum(),
                reason: "Deferred to a later chunk".into(),
            });
        }
        if !oversized.is_empty() {
            drops.push(DropInfo {
                section: "facts".into(),
                items_dropped: oversized.len(),
                chars_dropped: oversized.iter().map(|f| chars(&fact_line(f))).sum(),
                reason: "Larger than an empty chunk; skipped".into(),
            });
        }
        sections.push(SectionStats {
            name: "facts".into(),
            chars: used,
            items_included: included.len(),
            items_total: facts.len(),
        });

        // ── Compose ───────────────────────────────────────────────────────
        let mut payload = String::new();
        payload.push_str(&fixed[0].1);
        payload.push_str(&fixed[1].1);
        payload.push_str(&chunk_header(input.chunk));
        payload.push_str(DIRECTIVE);
        payload.push_str(DECISIONS_HEADER);
        for i in &kept_decisions {
            payload.push_str(&decision_line(&input.decisions[*i]));
        }
        payload.push_str(QUESTIONS_HEADER);
        for question in &input.questions[..kept_questions] {
            payload.push_str(&question_line(question));
        }
        payload.push_str(FACTS_HEADER);
        for i in &included {
            payload.push_str(&fact_lines[*i]);
        }

        let total_chars = chars(&payload);
        debug_assert!(total_chars <= limit);
        debug!(
            chunk = input.chunk,
            total_chars,
            limit,
            facts = included.len(),
            deferred = deferred.len(),
            "Chunk planned"
        );

        Ok(ChunkPlan {
            chunk: input.chunk,
            payload,
            total_chars,
            hard_limit: limit,
            included: included.iter().map(|i| facts[*i].id.clone()).collect(),
            consumed: stop,
            sections,
            drops,
            residual: ResidualPlan {
                facts: deferred,
                decisions_dropped,
                questions_deferred,
                oversized,
            },
        })
    }

    /// Rough number of chunks needed to deliver `facts`, ignoring
    /// carried-forward material. At least one.
    pub fn estimate_chunks(&self, system: &str, base: &Value, facts: &[Fact]) -> usize {
        let input = PlanInput {
            system,
            base,
            facts: &[],
            decisions: &[],
            questions: &[],
            chunk: 0,
        };
        let overhead = self.overhead(&input);
        let Some(capacity) = self.budget.hard_limit.checked_sub(overhead) else {
            return 1;
        };

        let mut chunks = 1;
        let mut used = 0;
        for fact in facts {
            let size = chars(&fact_line(fact));
            if size > capacity {
                continue;
            }
            if used + size > capacity {
                chunks += 1;
                used = 0;
            }
            used += size;
        }
        chunks
    }
}

fn render_base(base: &Value) -> String {
    serde_json::to_string(base).unwrap_or_default()
}

fn diagnose(fixed: &[(String, String)], total: usize, limit: usize) -> BudgetDiagnostic {
    let sections: Vec<SectionStats> = fixed
        .iter()
        .map(|(name, text)| SectionStats {
            name: name.clone(),
            chars: chars(text),
            items_included: 1,
            items_total: 1,
        })
        .collect();
    let over = total - limit;
    let largest = sections
        .iter()
        .max_by_key(|s| s.chars)
        .map(|s| s.name.as_str())
        .unwrap_or("system");
    let recommendation = match largest {
        "system" => format!("shorten the system instructions by at least {over} characters"),
        "request" => format!("trim the request payload by at least {over} characters"),
        _ => format!("raise the hard limit by at least {over} characters"),
    };
    BudgetDiagnostic {
        total,
        hard_limit: limit,
        sections,
        recommendation,
    }
}
