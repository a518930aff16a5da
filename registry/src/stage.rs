use std::fmt;

/// One of the four pipeline stages a plug-in can belong to (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Open,
    Prep,
    Code,
    Out,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Open, Stage::Prep, Stage::Code, Stage::Out];

    /// The directory name / ABI-signature segment for this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Open => "open",
            Stage::Prep => "prep",
            Stage::Code => "code",
            Stage::Out => "out",
        }
    }

    pub fn from_str(s: &str) -> Option<Stage> {
        match s {
            "open" => Some(Stage::Open),
            "prep" => Some(Stage::Prep),
            "code" => Some(Stage::Code),
            "out" => Some(Stage::Out),
            _ => None,
        }
    }

    /// CODE is the only stage that additionally requires a preview
    /// (`io_GetViewOutInfo` / `f0p` / `f1p`) path.
    pub fn requires_view_path(&self) -> bool {
        matches!(self, Stage::Code)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
