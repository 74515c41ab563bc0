use guard_core::agent::PromptRole;
use guard_core::RiskCategory;

const EXTRACTOR: &str = "You are a contract extraction specialist. Read the contract and extract its \
commercial terms exactly as written. Never infer values that the text does not state; use null instead.

Respond ONLY with a JSON object of this shape:
{
  \"parties\": [\"legal name\", ...],
  \"effective_date\": \"YYYY-MM-DD\" | null,
  \"expiration_date\": \"YYYY-MM-DD\" | null,
  \"amounts\": [{\"currency\": \"USD\", \"value\": \"120000.00\"}],
  \"payment_term_days\": 30,
  \"return_window_days\": 90 | null,
  \"renewal\": {\"automatic\": true, \"term_months\": 12, \"description\": \"...\"} | null,
  \"escalation_percent\": 5.0 | null,
  \"liability_cap\": \"unlimited\" | \"12 months of fees paid\" | null,
  \"clauses\": [{\"clause_type\": \"payment|returns|pricing|renewal|liability|termination|delivery|other\", \"text\": \"verbatim contract text\"}]
}
payment_term_days is required: use 30 when the contract states no payment terms. \
Clause texts must be copied verbatim from the contract, one excerpt per risky or notable clause.";

const ADVOCATE: &str = "You are the contract advocate. Argue that the contract is acceptable and \
standard. Find the best interpretation of concerning clauses, cite industry practice that supports the \
terms and identify mitigating factors. Never fabricate facts: when a clause is genuinely problematic, \
still present the best defensible argument and rate it weak.

Strength ratings: strong (clear industry standard, solid mitigation), moderate (reasonable \
interpretation), weak (best possible reading).

Respond ONLY with JSON:
{\"claims\": [{\"category\": \"payment\", \"assertion\": \"one or two sentences\", \
\"term_ref\": \"term sheet field or clause type relied on\", \"strength\": \"strong|moderate|weak\"}]}";

const AUDITOR_HEAD: &str = "You are the contract auditor. Identify risky clauses by comparing the term \
sheet against the company policy you are given. ASC 606 risks: extended payment terms (financing \
component), rights of return (variable consideration), price protection or most-favored-customer \
clauses, milestone or contingent payments, consignment, bill-and-hold. Commercial risks: unlimited \
liability, unfavorable auto-renewal, one-sided termination, excessive escalation.

For each finding quote the EXACT problematic language from one of the term sheet's clause excerpts, \
rate severity high, medium or low, and suggest a specific revision. Be thorough but fair; not every \
unusual clause is a deal-breaker.

Respond ONLY with JSON:
{\"flags\": [{\"category\": \"<category>\", \"severity\": \"high|medium|low\", \"quote\": \"verbatim text\", \
\"finding\": \"one sentence\", \"remediation\": \"specific revision\", \"reference\": \"ASC 606 paragraph or null\"}]}
Allowed categories: ";

/// System prompt for a role.
pub fn system_prompt(role: PromptRole) -> String {
    match role {
        PromptRole::Extractor => EXTRACTOR.to_string(),
        PromptRole::Advocate => ADVOCATE.to_string(),
        PromptRole::Auditor => {
            let categories: Vec<&str> = RiskCategory::ALL.iter().map(RiskCategory::as_str).collect();
            format!("{AUDITOR_HEAD}{}.", categories.join(", "))
        }
    }
}

/// Build the user turn. All backends use this so the prompt format stays
/// consistent.
pub fn build_instruction(role: PromptRole, context: &str) -> String {
    let mut s = String::new();
    match role {
        PromptRole::Extractor => {
            s.push_str("Extract the term sheet from this contract.\n\n---\n\n");
            s.push_str(context);
        }
        PromptRole::Advocate => {
            s.push_str("Argue for accepting the contract described by this term sheet.\n\n```json\n");
            s.push_str(context);
            s.push_str("\n```");
        }
        PromptRole::Auditor => {
            s.push_str("Audit this term sheet against the company policy.\n\n```json\n");
            s.push_str(context);
            s.push_str("\n```");
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auditor_prompt_lists_every_category() {
        let prompt = system_prompt(PromptRole::Auditor);
        for c in RiskCategory::ALL {
            assert!(prompt.contains(c.as_str()), "missing {c}");
        }
    }

    #[test]
    fn instruction_embeds_context() {
        let s = build_instruction(PromptRole::Advocate, "{\"payment_term_days\": 30}");
        assert!(s.contains("```json\n{\"payment_term_days\": 30}\n```"));
        let s = build_instruction(PromptRole::Extractor, "MASTER AGREEMENT");
        assert!(s.ends_with("MASTER AGREEMENT"));
    }
}
