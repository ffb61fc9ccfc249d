use serde::{Deserialize, Serialize};

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Span { line, col }
    }
}

/// The toolchain stage that raised a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Lexer,
    Parser,
    Compiler,
    Vm,
    Eval,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Lexer => "cilly lexer",
            Component::Parser => "cilly parser",
            Component::Compiler => "cilly compiler",
            Component::Vm => "cilly vm",
            Component::Eval => "cilly eval",
        };
        f.write_str(name)
    }
}

/// Renders `<component> : 第<line>行第<col>列 : <message>`, dropping the
/// position part when no span is known.
pub fn render(component: Component, span: Option<Span>, message: &str) -> String {
    match span {
        Some(span) => format!(
            "{} : 第{}行第{}列 : {}",
            component, span.line, span.col, message
        ),
        None => format!("{} : {}", component, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_position() {
        let text = render(Component::Parser, Some(Span::new(3, 7)), "expected ';'");
        assert_eq!(text, "cilly parser : 第3行第7列 : expected ';'");
    }

    #[test]
    fn test_render_without_position() {
        let text = render(Component::Vm, None, "unknown opcode 99");
        assert_eq!(text, "cilly vm : unknown opcode 99");
    }
}
