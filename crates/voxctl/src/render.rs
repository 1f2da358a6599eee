//! Output rendering for voxctl.

use serde_json::Value;
use vox_core::{Message, SkillStatus};

use crate::client::ConverseResponse;

/// Print skills in tabular format.
pub fn print_skill_list(skills: &[SkillStatus]) {
    if skills.is_empty() {
        println!("No skills registered.");
        return;
    }

    println!(
        "{:<32}  {:<6}  {:<15}  {:<6}  {:<20}",
        "ID", "SOURCE", "PHASE", "ACTIVE", "LOADED AT"
    );
    println!("{}", "-".repeat(85));

    for skill in skills {
        println!(
            "{:<32}  {:<6}  {:<15}  {:<6}  {:<20}",
            truncate(&skill.skill_id, 32),
            skill.source.as_str(),
            skill.phase.as_str(),
            if skill.active && skill.loaded { "yes" } else { "no" },
            skill
                .last_loaded
                .map(|t| format_time(&t))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    println!();
    println!("{} skill(s)", skills.len());
}

/// Print the outcome of a converse request.
pub fn print_converse(response: &ConverseResponse) {
    match &response.error {
        Some(error) => println!("{}: error: {}", response.skill_id, error),
        None if response.result => println!("{}: handled", response.skill_id),
        None => println!("{}: declined", response.skill_id),
    }
}

/// Print counters, one per line.
pub fn print_metrics(metrics: &Value) {
    let Some(counters) = metrics.as_object() else {
        println!("{metrics}");
        return;
    };
    for (name, value) in counters {
        println!("{:<24}  {}", name, value);
    }
}

/// Print one bus message as `<type> <data json>`.
pub fn print_message(message: &Message) {
    let data = serde_json::to_string(&message.data).unwrap_or_default();
    println!("{} {}", message.msg_type, data);
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_ids() {
        assert_eq!(truncate("timer", 32), "timer");
    }

    #[test]
    fn truncate_shortens_long_ids() {
        assert_eq!(truncate("skill-date-time.neon", 10), "skill-d...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("wetterbericht-für-heute", 16), "wetterbericht...");
    }
}
