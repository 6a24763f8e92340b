use std::fmt;

/// 命令树节点。每个节点独占其子节点，整棵树由调用方持有，执行器只借用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Simple(SimpleCommand),
    Subshell(Subshell),
    /// 左边是一个 stage，右边是管道的剩余部分
    Pipe(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Seq(Box<Node>, Option<Box<Node>>),
    Background(Box<Node>, Option<Box<Node>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Simple,
    Pipe,
    Subshell,
    And,
    Or,
    Seq,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOp {
    Input,  // <
    Output, // >
    Append, // >>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub operator: RedirectOp,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    pub locals: Vec<Assignment>,
    pub program: String,
    pub arguments: Vec<String>,
    pub input: Option<Redirection>,
    pub output: Option<Redirection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subshell {
    pub locals: Vec<Assignment>,
    pub body: Box<Node>,
    pub input: Option<Redirection>,
    pub output: Option<Redirection>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Simple(_) => NodeKind::Simple,
            Node::Subshell(_) => NodeKind::Subshell,
            Node::Pipe(..) => NodeKind::Pipe,
            Node::And(..) => NodeKind::And,
            Node::Or(..) => NodeKind::Or,
            Node::Seq(..) => NodeKind::Seq,
            Node::Background(..) => NodeKind::Background,
        }
    }
}

impl SimpleCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// program 作为 argv[0]，后接参数
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.arguments.iter().map(String::as_str))
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, shell_words::quote(&self.value))
    }
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.operator {
            RedirectOp::Input => "<",
            RedirectOp::Output => ">",
            RedirectOp::Append => ">>",
        };
        write!(f, "{}{}", op, shell_words::quote(&self.filename))
    }
}

fn write_stage_parts(
    f: &mut fmt::Formatter<'_>,
    input: &Option<Redirection>,
    output: &Option<Redirection>,
) -> fmt::Result {
    for redirection in input.iter().chain(output.iter()) {
        write!(f, " {}", redirection)?;
    }
    Ok(())
}

impl fmt::Display for SimpleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for local in &self.locals {
            write!(f, "{} ", local)?;
        }
        f.write_str(&shell_words::join(self.argv()))?;
        write_stage_parts(f, &self.input, &self.output)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Simple(cmd) => write!(f, "{}", cmd),
            Node::Subshell(sub) => {
                for local in &sub.locals {
                    write!(f, "{} ", local)?;
                }
                write!(f, "({})", sub.body)?;
                write_stage_parts(f, &sub.input, &sub.output)
            }
            Node::Pipe(left, right) => write!(f, "{} | {}", left, right),
            Node::And(left, right) => write!(f, "{} && {}", left, right),
            Node::Or(left, right) => write!(f, "{} || {}", left, right),
            Node::Seq(left, None) => write!(f, "{} ;", left),
            Node::Seq(left, Some(right)) => write!(f, "{} ; {}", left, right),
            Node::Background(left, None) => write!(f, "{} &", left),
            Node::Background(left, Some(right)) => write!(f, "{} & {}", left, right),
        }
    }
}
