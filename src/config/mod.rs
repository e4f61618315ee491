use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

mod prompts;

pub use prompts::{PromptTemplates, render_template};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "deep-researcher.toml";

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Mistral => write!(f, "mistral"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "mistral" => Ok(LLMProvider::Mistral),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// LLM服务配置
    pub llm: LLMConfig,

    /// 研究流程参数
    pub research: ResearchConfig,

    /// 各阶段使用的模型
    pub models: StageModels,

    /// 网页搜索配置
    pub search: SearchConfig,

    /// 提示词模板
    pub prompts: PromptTemplates,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// LLM服务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 温度
    pub temperature: f64,
}

/// 研究流程参数
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ResearchConfig {
    /// 结构化决策调用（澄清、主管、研究员）的最大尝试次数
    pub max_structured_output_retries: usize,

    /// 是否在研究前向用户澄清问题
    pub allow_clarification: bool,

    /// 单轮主管决策允许并发启动的研究单元上限
    pub max_concurrent_research_units: usize,

    /// 单个研究员的工具调用轮数上限
    pub max_react_tool_calls: usize,

    /// 主管决策轮数上限
    pub max_researcher_iterations: usize,

    /// 研究压缩的最大尝试次数
    pub compression_max_attempts: usize,

    /// 最终报告的最大重试次数（总尝试次数为该值加一）
    pub final_report_max_retries: usize,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,
}

/// 单个阶段的模型配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// 模型名称
    pub model: String,

    /// 最大输出tokens
    pub max_tokens: u64,

    /// 上下文窗口大小（tokens），为空时按内置表推断
    pub context_window: Option<usize>,
}

impl ModelSettings {
    pub fn new(model: &str, max_tokens: u64) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            context_window: None,
        }
    }
}

/// 各阶段使用的模型
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StageModels {
    pub clarify: ModelSettings,
    pub research: ModelSettings,
    pub compression: ModelSettings,
    pub summarization: ModelSettings,
    pub final_report: ModelSettings,
}

impl StageModels {
    /// 所有阶段统一使用同一个模型
    pub fn set_all(&mut self, model: &str) {
        for settings in [
            &mut self.clarify,
            &mut self.research,
            &mut self.compression,
            &mut self.summarization,
            &mut self.final_report,
        ] {
            settings.model = model.to_string();
            settings.context_window = None;
        }
    }
}

/// 网页搜索配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// 是否为研究员启用 web_search 工具
    pub enabled: bool,

    /// 搜索服务 API KEY
    pub api_key: String,

    /// 搜索服务地址
    pub base_url: String,

    /// 单个查询返回的结果数
    pub max_results: usize,

    /// 内容短于该长度的结果会抓取完整网页
    pub min_content_chars: usize,

    /// 送入摘要模型前网页内容的最大字符数
    pub max_content_chars: usize,

    /// 网页摘要超时（秒）
    pub summarization_timeout_secs: u64,

    /// 网页抓取超时（秒）
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api.openai.com/v1"),
            temperature: 0.1,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_structured_output_retries: 3,
            allow_clarification: true,
            max_concurrent_research_units: 5,
            max_react_tool_calls: 5,
            max_researcher_iterations: 3,
            compression_max_attempts: 3,
            final_report_max_retries: 3,
            retry_delay_ms: 0,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::new("gpt-4.1", 8192)
    }
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            clarify: ModelSettings::new("gpt-4.1", 8192),
            research: ModelSettings::new("gpt-4.1", 10000),
            compression: ModelSettings::new("gpt-4.1-mini", 8192),
            summarization: ModelSettings::new("gpt-4.1-mini", 8192),
            final_report: ModelSettings::new("gpt-4.1", 10000),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: std::env::var("TAVILY_API_KEY").unwrap_or_default(),
            base_url: String::from("https://api.tavily.com"),
            max_results: 5,
            min_content_chars: 100,
            max_content_chars: 50_000,
            summarization_timeout_secs: 60,
            fetch_timeout_secs: 30,
        }
    }
}
