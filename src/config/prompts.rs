//! 提示词模板
//!
//! 模板中的 `{name}` 占位符由 [`render_template`] 替换，未提供的占位符原样保留。

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

/// 各阶段的提示词模板
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptTemplates {
    /// 澄清阶段，占位符：`{messages}` `{date}`
    pub clarify_with_user: String,

    /// 研究简报，占位符：`{messages}` `{date}`
    pub research_brief: String,

    /// 主管系统提示词，占位符：`{date}` `{max_concurrent_research_units}`
    pub lead_researcher: String,

    /// 研究员系统提示词，占位符：`{mcp_prompt}` `{date}`
    pub research_system: String,

    /// 研究压缩系统提示词，占位符：`{date}`
    pub compress_research_system: String,

    /// 追加在研究员对话末尾的压缩指令
    pub compress_research_instruction: String,

    /// 最终报告，占位符：`{research_brief}` `{messages}` `{findings}` `{date}`
    pub final_report: String,

    /// 网页摘要，占位符：`{webpage_content}` `{date}`
    pub summarize_webpage: String,

    /// 额外工具说明，注入研究员系统提示词
    pub mcp_prompt: String,
}

/// 一次扫描替换模板中的 `{name}` 占位符，替换进来的内容不再参与替换
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            clarify_with_user: CLARIFY_WITH_USER.to_string(),
            research_brief: RESEARCH_BRIEF.to_string(),
            lead_researcher: LEAD_RESEARCHER.to_string(),
            research_system: RESEARCH_SYSTEM.to_string(),
            compress_research_system: COMPRESS_RESEARCH_SYSTEM.to_string(),
            compress_research_instruction: COMPRESS_RESEARCH_INSTRUCTION.to_string(),
            final_report: FINAL_REPORT.to_string(),
            summarize_webpage: SUMMARIZE_WEBPAGE.to_string(),
            mcp_prompt: String::new(),
        }
    }
}

const CLARIFY_WITH_USER: &str = r#"These are the messages exchanged so far with the user asking for a report:
<Messages>
{messages}
</Messages>

Today's date is {date}.

Decide whether you need to ask the user a clarifying question before starting research.
If there are acronyms, abbreviations, or unknown terms, or the scope is genuinely ambiguous, reply with ONE concise clarifying question as plain text and do not call any tool.
If you already asked a clarifying question in the history, you almost never need to ask another one.
If you have enough information, call the `clarity_completed` tool with a `verification` message that acknowledges the request, briefly summarizes your understanding of it, and confirms that research is starting now."#;

const RESEARCH_BRIEF: &str = r#"You will be given the messages exchanged so far between yourself and the user.
Translate them into a detailed and concrete research question that will be used to guide the research.

<Messages>
{messages}
</Messages>

Today's date is {date}.

Guidelines:
- Include every preference and detail the user stated, and keep the user's own framing.
- Leave open any dimension the user did not specify instead of inventing constraints.
- Phrase the request in the first person, from the perspective of the user.
- If specific sources should be prioritized, say so.
- Reply with the research question only."#;

const LEAD_RESEARCHER: &str = r#"You are a research supervisor. Your job is to conduct research by calling the `conduct_research` tool. Today's date is {date}.

<Task>
Delegate focused sub-topics of the user's research brief to researchers with `conduct_research`.
When you are satisfied with the findings returned by the researchers, call `research_complete`.
</Task>

<Limits>
- Bias towards a single researcher unless the brief clearly benefits from parallel work, such as comparing several distinct entities.
- Use at most {max_concurrent_research_units} `conduct_research` calls per turn. Extra calls will be rejected.
- Each `research_topic` must be standalone and fully specified, because researchers cannot see the other topics or the user's conversation.
- Stop when you can answer the brief confidently; do not keep delegating to polish.
</Limits>"#;

const RESEARCH_SYSTEM: &str = r#"You are a research assistant conducting research on the user's input topic. Today's date is {date}.

<Task>
Use the available tools to gather information that answers the topic.
Call `research_complete` when you have enough information to answer comprehensively.
</Task>

<Tools>
- `web_search`: search the web with one or more queries at once.
- `research_complete`: signal that research is finished.
{mcp_prompt}
</Tools>

<Limits>
- Start with broad searches, then narrow down to fill specific gaps.
- Stop when you can answer confidently or when the last searches return similar information.
- Simple topics need two or three tool calls, complex topics at most five.
</Limits>"#;

const COMPRESS_RESEARCH_SYSTEM: &str = r#"You are a research assistant that has conducted research on a topic by calling several tools. Today's date is {date}.

<Task>
Clean up the information gathered from the tool calls and web searches in the existing messages.
Keep all relevant statements and information verbatim, only removing obviously irrelevant or duplicate content.
</Task>

<Output Format>
**List of Queries and Tool Calls Made**
**Fully Comprehensive Findings**
**List of All Relevant Sources (with citations in the report)**
</Output Format>

<Citation Rules>
- Assign each unique URL a single citation number like [1].
- End with ### Sources listing each source with its number, numbered sequentially without gaps.
</Citation Rules>"#;

const COMPRESS_RESEARCH_INSTRUCTION: &str = "All above messages are about research conducted by an AI Researcher. Please clean up these findings.\n\nDO NOT summarize the information. I want the raw information returned, just in a cleaner format. Make sure all relevant information is preserved - you can rewrite findings verbatim.";

const FINAL_REPORT: &str = r#"Based on all the research conducted, create a comprehensive, well-structured answer to the overall research brief:
<Research Brief>
{research_brief}
</Research Brief>

For more context, here are all the messages so far:
<Messages>
{messages}
</Messages>

Today's date is {date}.

Here are the findings from the research that you conducted:
<Findings>
{findings}
</Findings>

Write a detailed report in markdown that:
1. Is organized with proper headings (# for the title, ## for sections, ### for subsections)
2. Includes specific facts and insights from the research
3. References relevant sources using [Title](URL) format
4. Ends with a ### Sources section listing all referenced links, numbered sequentially
5. Is written in the same language as the user's messages"#;

const SUMMARIZE_WEBPAGE: &str = r#"You are tasked with summarizing the raw content of a webpage retrieved from a web search.
Preserve the most important information: main topic, key facts, statistics, dates, and notable quotes.

<webpage_content>
{webpage_content}
</webpage_content>

Today's date is {date}.

Reply with a JSON object of this shape:
```json
{
  "summary": "Concise summary of the page, around 25-30 percent of the original length",
  "key_excerpts": "First important quote, Second important quote, up to five excerpts"
}
```"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template_replaces_placeholders() {
        let rendered = render_template(
            "date={date}, units={max_concurrent_research_units}, date again={date}",
            &[("date", "2025-01-01"), ("max_concurrent_research_units", "5")],
        );
        assert_eq!(rendered, "date=2025-01-01, units=5, date again=2025-01-01");
    }

    #[test]
    fn test_render_template_keeps_unknown_placeholders() {
        let rendered = render_template("{known} {unknown}", &[("known", "x")]);
        assert_eq!(rendered, "x {unknown}");
    }

    #[test]
    fn test_render_template_does_not_rescan_values() {
        let rendered = render_template(
            "A={first}|B={second}",
            &[("first", "literal {second}"), ("second", "{first}")],
        );
        assert_eq!(rendered, "A=literal {second}|B={first}");
    }

    #[test]
    fn test_default_templates_carry_placeholders() {
        let prompts = PromptTemplates::default();
        assert!(prompts.clarify_with_user.contains("{messages}"));
        assert!(prompts.lead_researcher.contains("{max_concurrent_research_units}"));
        assert!(prompts.final_report.contains("{findings}"));
        assert!(prompts.summarize_webpage.contains("{webpage_content}"));
        assert!(prompts.research_system.contains("{mcp_prompt}"));
    }
}
