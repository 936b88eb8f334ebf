//! 使用统计：消息数、累计 token、按线性价格估算的费用

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::Pricing;

/// 单个后端的累计使用统计；只在显式 reset 时清零
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub messages: u64,
    pub tokens: u64,
    pub cost: f64,
    /// 上次清零时间
    pub since: DateTime<Utc>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            messages: 0,
            tokens: 0,
            cost: 0.0,
            since: Utc::now(),
        }
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次带 token 数据的回复，返回本次估算费用
    pub fn record(
        &mut self,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        pricing: &Pricing,
    ) -> f64 {
        let cost = pricing.cost(prompt_tokens, completion_tokens);
        self.messages += 1;
        self.tokens += total_tokens;
        self.cost += cost;
        cost
    }

    /// 记录一次没有 token 数据的回复（如异步 Run）
    pub fn record_message(&mut self) {
        self.messages += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// DispatchCore 汇总的统计报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageReport {
    pub total_messages: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    /// (模型 id, 统计)，按注册顺序
    pub per_model: Vec<(String, UsageStats)>,
}

impl UsageReport {
    pub fn add(&mut self, id: &str, stats: UsageStats) {
        self.total_messages += stats.messages;
        self.total_tokens += stats.tokens;
        self.estimated_cost += stats.cost;
        self.per_model.push((id.to_string(), stats));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_linear_pricing() {
        let mut stats = UsageStats::new();
        let pricing = Pricing {
            input: 0.03,
            output: 0.06,
        };
        let cost = stats.record(1000, 500, 1500, &pricing);
        assert!((cost - 0.06).abs() < 1e-9);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.tokens, 1500);
        assert!((stats.cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut stats = UsageStats::new();
        stats.record(10, 10, 20, &Pricing::default());
        stats.record_message();
        stats.reset();
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.tokens, 0);
        assert_eq!(stats.cost, 0.0);
    }

    #[test]
    fn test_report_aggregates() {
        let mut report = UsageReport::default();
        let mut a = UsageStats::new();
        a.record(1000, 1000, 2000, &Pricing::default());
        let mut b = UsageStats::new();
        b.record_message();
        report.add("a", a);
        report.add("b", b);
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.total_tokens, 2000);
        assert!((report.estimated_cost - 0.002).abs() < 1e-9);
        assert_eq!(report.per_model[1].0, "b");
    }
}
