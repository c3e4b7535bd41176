//! `{name}` 占位模板渲染

/// 按 (名称, 值) 依次替换 `{name}`；模板中未出现的名称忽略，未给出值的占位保持原样
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// 首字母大写（能力列表里的处理器名、历史记录里的角色名）
pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
