// ==========================================
// 会计数据导入管道 - 列名文本规范化
// ==========================================
// 规则: 大写 + 去重音（NFD 后丢弃组合符）+ 折叠空白
// ==========================================

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// 规范化列名，供所有关键字匹配使用
///
/// "  Fecha   contabilización " → "FECHA CONTABILIZACION"
pub fn normalize_text(value: &str) -> String {
    let stripped: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 规范化文本是否包含全部关键字
pub fn contains_all(normalized: &str, tokens: &[&str]) -> bool {
    tokens.iter().all(|t| normalized.contains(t))
}
