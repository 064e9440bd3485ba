/// Execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Single-writer control loops whose passes must never overlap.
	Control,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Control => "control",
		}
	}
}
