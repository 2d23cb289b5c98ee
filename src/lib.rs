//! Bioage - 生物学年龄估计流水线
//!
//! 把自由文本的临床记录逐条交给本地大语言模型，解析其半结构化输出，
//! 并以检查点的方式持久化进度，中断后可以继续运行而不重复处理。

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
