use crate::config::{Config, DEFAULT_CONFIG_FILE, LLMProvider};
use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;

/// Deep Researcher - 由Rust与大模型驱动的深度研究引擎
#[derive(Parser, Debug)]
#[command(name = "deep-researcher")]
#[command(
    about = "Multi-stage research agent: clarifies the request, writes a research brief, fans out bounded parallel researchers and synthesizes a final report."
)]
#[command(version)]
pub struct Args {
    /// 研究问题
    pub query: String,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// LLM Provider (openai, moonshot, deepseek, mistral, openrouter, anthropic, ollama)
    #[arg(long)]
    pub provider: Option<String>,

    /// LLM API KEY
    #[arg(long)]
    pub api_key: Option<String>,

    /// LLM API基地址
    #[arg(long)]
    pub api_base_url: Option<String>,

    /// 所有阶段统一使用的模型
    #[arg(short, long)]
    pub model: Option<String>,

    /// 主管单轮最多派发的研究员数量
    #[arg(long)]
    pub max_concurrent_research_units: Option<usize>,

    /// 主管最多迭代轮数
    #[arg(long)]
    pub max_researcher_iterations: Option<usize>,

    /// 单个研究员最多工具调用轮数
    #[arg(long)]
    pub max_react_tool_calls: Option<usize>,

    /// 跳过澄清环节
    #[arg(long)]
    pub no_clarification: bool,

    /// 不为研究员提供网页搜索
    #[arg(long)]
    pub no_search: bool,

    /// 搜索服务 API KEY
    #[arg(long)]
    pub search_api_key: Option<String>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            // 显式指定的配置文件必须能读取
            Some(config_path) => Config::from_file(config_path)?,
            None => {
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);
                if default_config_path.exists() {
                    Config::from_file(&default_config_path)?
                } else {
                    Config::default()
                }
            }
        };

        // 覆盖LLM配置
        if let Some(provider_str) = self.provider {
            match provider_str.parse::<LLMProvider>() {
                Ok(provider) => config.llm.provider = provider,
                Err(e) => bail!("⚠️ {}", e),
            }
        }
        if let Some(api_base_url) = self.api_base_url {
            config.llm.api_base_url = api_base_url;
        }
        if let Some(api_key) = self.api_key {
            config.llm.api_key = api_key;
        }
        if let Some(model) = self.model {
            config.models.set_all(&model);
        }

        // 研究流程配置
        if let Some(units) = self.max_concurrent_research_units {
            config.research.max_concurrent_research_units = units;
        }
        if let Some(iterations) = self.max_researcher_iterations {
            config.research.max_researcher_iterations = iterations;
        }
        if let Some(calls) = self.max_react_tool_calls {
            config.research.max_react_tool_calls = calls;
        }
        if self.no_clarification {
            config.research.allow_clarification = false;
        }

        // 搜索配置
        if self.no_search {
            config.search.enabled = false;
        }
        if let Some(search_api_key) = self.search_api_key {
            config.search.api_key = search_api_key;
        }

        config.verbose = config.verbose || self.verbose;

        Ok(config)
    }
}
