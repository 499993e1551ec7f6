/// Sizing rules for the fetches issued against a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
	/// Rows the whole search needs before it can stop: `page_size * max_pages + 1`.
	pub required_size: u32,
	pub initial_size: u32,
	pub ceiling: u32,
	pub max_iterations: u32,
}
impl FetchPolicy {
	/// The first fetch is over-sized by the configured factor whenever a filter can discard
	/// scanned rows.
	pub fn new(required_size: u32, filtered: bool, cfg: &pn_config::Search) -> Self {
		let factor = if filtered { cfg.over_fetch_factor } else { 1 };

		Self {
			required_size,
			initial_size: required_size.saturating_mul(factor),
			ceiling: cfg.max_fetch_size,
			max_iterations: cfg.max_partition_iterations,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
	/// The buffer holds enough rows for the whole search.
	Satisfied,
	/// The partition has no rows left.
	Exhausted,
	Continue { next_size: u32 },
	/// The partition still has rows but the iteration cap was reached.
	BudgetExceeded { iterations: u32 },
}

/// Tracks one partition. Every partition starts again from the initial size.
#[derive(Debug, Clone)]
pub struct AdaptiveFetchController {
	policy: FetchPolicy,
	current_size: u32,
	iterations: u32,
}
impl AdaptiveFetchController {
	pub fn new(policy: FetchPolicy) -> Self {
		Self { policy, current_size: policy.initial_size.max(1), iterations: 0 }
	}

	pub fn fetch_size(&self) -> u32 {
		self.current_size
	}

	pub fn iterations(&self) -> u32 {
		self.iterations
	}

	/// Records one completed fetch. `returned` counts rows that survived the server-side filter
	/// in this fetch, `buffered` the rows accumulated by the whole search so far.
	pub fn record(&mut self, returned: usize, buffered: usize, has_cursor: bool) -> FetchDecision {
		self.iterations += 1;

		if buffered >= self.policy.required_size as usize {
			return FetchDecision::Satisfied;
		}
		if !has_cursor {
			return FetchDecision::Exhausted;
		}
		if self.iterations >= self.policy.max_iterations {
			return FetchDecision::BudgetExceeded { iterations: self.iterations };
		}

		self.current_size = next_fetch_size(
			self.current_size,
			returned,
			self.policy.required_size,
			self.policy.ceiling,
		);

		FetchDecision::Continue { next_size: self.current_size }
	}
}

/// Grows the next fetch by up to 2x, less when the last fetch already returned a share of the
/// required rows.
pub fn next_fetch_size(current: u32, returned: usize, required_size: u32, ceiling: u32) -> u32 {
	let yield_ratio = (returned as f64 / f64::from(required_size.max(1))).min(1.0);
	let grown = (f64::from(current) * (2.0 - yield_ratio)).round();

	(grown.min(f64::from(u32::MAX)) as u32).min(ceiling).max(1)
}
