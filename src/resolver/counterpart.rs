//! 对方解析
//!
//! 取文本末尾的 ~15 个 token，对每个激活连接的展示名做重叠打分。
//! 最高分领先次高分达到固定差值才自动判定；否则返回并列候选，绝不在歧义下猜测。

use crate::store::Connection;

/// 参与打分的末尾 token 数
const TRAILING_TOKENS: usize = 15;
/// 自动判定所需的领先差值
const AUTO_RESOLVE_MARGIN: i32 = 2;
/// 整词命中 / 子串命中的分值
const EXACT_WORD_SCORE: i32 = 2;
const SUBSTRING_SCORE: i32 = 1;

/// 解析结果
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// 唯一可信候选
    Resolved(Connection),
    /// 并列 / 接近并列，需要显式消歧
    Ambiguous(Vec<Connection>),
    /// 没有任何候选命中
    None,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn score_name(trailing: &[String], display_name: &str) -> i32 {
    let name_tokens = tokenize(display_name);
    let mut score = 0;
    for token in trailing {
        if token.len() < 2 {
            continue;
        }
        for name_token in &name_tokens {
            if token == name_token {
                score += EXACT_WORD_SCORE;
            } else if token.len() >= 3 && (name_token.contains(token) || token.contains(name_token))
            {
                score += SUBSTRING_SCORE;
            }
        }
    }
    score
}

/// 从自由文本与激活连接列表解析对方
pub fn resolve_counterpart(text: &str, connections: &[Connection]) -> ResolveOutcome {
    let tokens = tokenize(text);
    let start = tokens.len().saturating_sub(TRAILING_TOKENS);
    let trailing = &tokens[start..];

    let mut scored: Vec<(i32, &Connection)> = connections
        .iter()
        .map(|c| (score_name(trailing, &c.display_name), c))
        .filter(|(score, _)| *score > 0)
        .collect();

    if scored.is_empty() {
        return ResolveOutcome::None;
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let top = scored[0].0;
    let runner_up = scored.get(1).map(|(s, _)| *s).unwrap_or(0);
    if top - runner_up >= AUTO_RESOLVE_MARGIN {
        return ResolveOutcome::Resolved(scored[0].1.clone());
    }
    ResolveOutcome::Ambiguous(
        scored
            .into_iter()
            .filter(|(score, _)| top - score < AUTO_RESOLVE_MARGIN)
            .map(|(_, c)| c.clone())
            .collect(),
    )
}
