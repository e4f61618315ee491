//! 各阶段提示词的渲染

use crate::config::{Config, render_template};
use crate::llm::client::Message;
use crate::llm::client::utils::{buffer_string, today_str};

pub fn clarify_prompt(config: &Config, messages: &[Message]) -> String {
    let date = today_str();
    let conversation = buffer_string(messages);
    render_template(
        &config.prompts.clarify_with_user,
        &[("date", &date), ("messages", &conversation)],
    )
}

pub fn brief_prompt(config: &Config, messages: &[Message]) -> String {
    let date = today_str();
    let conversation = buffer_string(messages);
    render_template(
        &config.prompts.research_brief,
        &[("date", &date), ("messages", &conversation)],
    )
}

pub fn supervisor_system_prompt(config: &Config) -> String {
    let date = today_str();
    let units = config.research.max_concurrent_research_units.to_string();
    render_template(
        &config.prompts.lead_researcher,
        &[("date", &date), ("max_concurrent_research_units", &units)],
    )
}

pub fn researcher_system_prompt(config: &Config) -> String {
    let date = today_str();
    render_template(
        &config.prompts.research_system,
        &[("date", &date), ("mcp_prompt", &config.prompts.mcp_prompt)],
    )
}

pub fn compression_system_prompt(config: &Config) -> String {
    let date = today_str();
    render_template(&config.prompts.compress_research_system, &[("date", &date)])
}

/// 简报与对话中出现的 `{...}` 文本原样保留
pub fn final_report_prompt(
    config: &Config,
    research_brief: &str,
    messages: &[Message],
    findings: &str,
) -> String {
    let date = today_str();
    let conversation = buffer_string(messages);
    render_template(
        &config.prompts.final_report,
        &[
            ("date", &date),
            ("research_brief", research_brief),
            ("messages", &conversation),
            ("findings", findings),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_report_prompt_fills_placeholders() {
        let mut config = Config::default();
        config.prompts.final_report =
            "B={research_brief}|M={messages}|F={findings}".to_string();
        let prompt = final_report_prompt(
            &config,
            "brief",
            &[Message::user("hello")],
            "note {date}",
        );
        assert_eq!(prompt, "B=brief|M=Human: hello|F=note {date}");
    }

    #[test]
    fn test_final_report_prompt_keeps_braces_in_user_text() {
        let mut config = Config::default();
        config.prompts.final_report =
            "B={research_brief}|M={messages}|F={findings}".to_string();
        let prompt = final_report_prompt(
            &config,
            "brief mentions {messages}",
            &[Message::user("explain the python literal {findings}")],
            "NOTES",
        );
        assert_eq!(
            prompt,
            "B=brief mentions {messages}|M=Human: explain the python literal {findings}|F=NOTES"
        );
    }

    #[test]
    fn test_supervisor_prompt_names_unit_limit() {
        let mut config = Config::default();
        config.research.max_concurrent_research_units = 7;
        config.prompts.lead_researcher = "limit {max_concurrent_research_units}".to_string();
        assert_eq!(supervisor_system_prompt(&config), "limit 7");
    }
}
