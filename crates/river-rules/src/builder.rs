//! Rule builders
//!
//! Engines describe a decision as a list of checks plus optional producers for
//! the chain authorization, parent event and derived events. Nothing is
//! evaluated until `run()`, which walks the checks in registration order and
//! only then invokes the producers.
//!
//! Add-event checks have three outcomes: `Ok(Verdict::Accept)` continues,
//! `Ok(Verdict::NoOp)` stops with [`AddEventDecision::NoOp`] and `Err` rejects.

use river_core::{ChainAuthArgs, Payload, RiverError, RiverResult, StreamId};
use std::fmt;

/// Outcome of a single add-event check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Continue with the next check
    Accept,
    /// The event is redundant; stop without error
    NoOp,
}

impl Verdict {
    /// `Accept` when `accept` holds, `NoOp` otherwise.
    pub fn accept_if(accept: bool) -> Self {
        if accept {
            Verdict::Accept
        } else {
            Verdict::NoOp
        }
    }
}

/// Event that must already exist in another stream before the candidate is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredParentEvent {
    /// Stream that must hold the parent
    pub stream_id: StreamId,
    /// Payload the parent event carries
    pub payload: Payload,
}

/// Event to be synthesized in another stream once a new stream is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedEvent {
    /// Stream the event is written to
    pub stream_id: StreamId,
    /// Payload of the synthesized event
    pub payload: Payload,
}

/// Result of a successful add-event evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddEventDecision {
    /// Append the event once the chain check passes and the parent event exists
    Accept {
        /// On-chain check the creator must pass
        chain_auth: Option<ChainAuthArgs>,
        /// Event that must exist elsewhere first
        required_parent: Option<RequiredParentEvent>,
    },
    /// The event changes nothing; drop it silently
    NoOp,
}

impl AddEventDecision {
    /// Whether the event should be appended.
    pub fn is_accept(&self) -> bool {
        matches!(self, AddEventDecision::Accept { .. })
    }

    /// Chain authorization of an accepted event, if any.
    pub fn chain_auth(&self) -> Option<&ChainAuthArgs> {
        match self {
            AddEventDecision::Accept { chain_auth, .. } => chain_auth.as_ref(),
            AddEventDecision::NoOp => None,
        }
    }

    /// Parent event of an accepted event, if any.
    pub fn required_parent(&self) -> Option<&RequiredParentEvent> {
        match self {
            AddEventDecision::Accept {
                required_parent, ..
            } => required_parent.as_ref(),
            AddEventDecision::NoOp => None,
        }
    }
}

impl fmt::Display for AddEventDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddEventDecision::NoOp => f.write_str("no-op"),
            AddEventDecision::Accept {
                chain_auth,
                required_parent,
            } => {
                f.write_str("accept")?;
                if let Some(auth) = chain_auth {
                    write!(f, " chain_auth=[{auth}]")?;
                }
                if let Some(parent) = required_parent {
                    write!(
                        f,
                        " parent={}:{}",
                        parent.stream_id,
                        parent.payload.content_name()
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Check returning a three-way verdict.
pub type RuleCheck<'a> = Box<dyn Fn() -> RiverResult<Verdict> + 'a>;

/// Producer of an optional chain authorization requirement.
pub type ChainAuthProducer<'a> = Box<dyn Fn() -> RiverResult<Option<ChainAuthArgs>> + 'a>;

type ParentEventProducer<'a> = Box<dyn Fn() -> RiverResult<Option<RequiredParentEvent>> + 'a>;

enum Step<'a> {
    Check(RuleCheck<'a>),
    OneOf(Vec<RuleCheck<'a>>),
}

impl Step<'_> {
    fn evaluate(&self) -> RiverResult<Verdict> {
        match self {
            Step::Check(check) => check(),
            Step::OneOf(checks) => {
                let mut last_err = None;
                for check in checks {
                    match check() {
                        Ok(Verdict::Accept) => return Ok(Verdict::Accept),
                        Ok(Verdict::NoOp) => {}
                        Err(err) => last_err = Some(err),
                    }
                }
                match last_err {
                    Some(err) => Err(err),
                    None => Ok(Verdict::NoOp),
                }
            }
        }
    }
}

/// Builder for add-event decisions.
#[derive(Default)]
pub struct AddEventRuleBuilder<'a> {
    steps: Vec<Step<'a>>,
    chain_auth: Option<ChainAuthProducer<'a>>,
    parent_event: Option<ParentEventProducer<'a>>,
    failure: Option<RiverError>,
}

impl<'a> AddEventRuleBuilder<'a> {
    /// Empty rule; accepts with no requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check.
    pub fn check(mut self, check: impl Fn() -> RiverResult<Verdict> + 'a) -> Self {
        self.steps.push(Step::Check(Box::new(check)));
        self
    }

    /// Append a check that passes when any of `checks` accepts.
    pub fn check_one_of(mut self, checks: impl IntoIterator<Item = RuleCheck<'a>>) -> Self {
        self.steps.push(Step::OneOf(checks.into_iter().collect()));
        self
    }

    /// Set the chain authorization producer, evaluated after all checks accept.
    pub fn require_chain_auth(
        mut self,
        producer: impl Fn() -> RiverResult<Option<ChainAuthArgs>> + 'a,
    ) -> Self {
        self.chain_auth = Some(Box::new(producer));
        self
    }

    /// Set the parent event producer, evaluated after the chain authorization.
    pub fn require_parent_event(
        mut self,
        producer: impl Fn() -> RiverResult<Option<RequiredParentEvent>> + 'a,
    ) -> Self {
        self.parent_event = Some(Box::new(producer));
        self
    }

    /// Reject unconditionally.
    pub fn fail(mut self, err: RiverError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Evaluate the rule.
    pub fn run(&self) -> RiverResult<AddEventDecision> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        for step in &self.steps {
            if step.evaluate()? == Verdict::NoOp {
                return Ok(AddEventDecision::NoOp);
            }
        }
        let chain_auth = match &self.chain_auth {
            Some(producer) => producer()?,
            None => None,
        };
        let required_parent = match &self.parent_event {
            Some(producer) => producer()?,
            None => None,
        };
        Ok(AddEventDecision::Accept {
            chain_auth,
            required_parent,
        })
    }
}

impl fmt::Debug for AddEventRuleBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddEventRuleBuilder")
            .field("checks", &self.steps.len())
            .field("chain_auth", &self.chain_auth.is_some())
            .field("parent_event", &self.parent_event.is_some())
            .field("failure", &self.failure)
            .finish()
    }
}

// =============================================================================
// Stream creation
// =============================================================================

/// Requirements for creating a stream from its genesis events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStreamRules {
    /// Personal stream of the creator
    pub creator_stream_id: StreamId,
    /// Users that must exist before the stream is created
    pub required_users: Vec<String>,
    /// Streams the creator must be a member of
    pub required_memberships: Vec<StreamId>,
    /// On-chain check the creator must pass
    pub chain_auth: Option<ChainAuthArgs>,
    /// Events to add to other streams once the stream exists
    pub derived_events: Vec<DerivedEvent>,
}

type CreationCheck<'a> = Box<dyn Fn() -> RiverResult<()> + 'a>;
type ListProducer<'a, T> = Box<dyn Fn() -> RiverResult<Vec<T>> + 'a>;

/// Builder for create-stream decisions.
pub struct CreateStreamRuleBuilder<'a> {
    creator_stream_id: StreamId,
    checks: Vec<CreationCheck<'a>>,
    required_memberships: Vec<ListProducer<'a, StreamId>>,
    required_users: Vec<ListProducer<'a, String>>,
    chain_auth: Option<ChainAuthProducer<'a>>,
    derived_events: Vec<ListProducer<'a, DerivedEvent>>,
    failure: Option<RiverError>,
}

impl<'a> CreateStreamRuleBuilder<'a> {
    /// Empty rule for a stream created by the owner of `creator_stream_id`.
    pub fn new(creator_stream_id: StreamId) -> Self {
        Self {
            creator_stream_id,
            checks: Vec::new(),
            required_memberships: Vec::new(),
            required_users: Vec::new(),
            chain_auth: None,
            derived_events: Vec::new(),
            failure: None,
        }
    }

    /// Append a structural check.
    pub fn check(mut self, check: impl Fn() -> RiverResult<()> + 'a) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Add streams the creator must already belong to.
    pub fn require_memberships(
        mut self,
        producer: impl Fn() -> RiverResult<Vec<StreamId>> + 'a,
    ) -> Self {
        self.required_memberships.push(Box::new(producer));
        self
    }

    /// Add users that must already exist.
    pub fn require_users(mut self, producer: impl Fn() -> RiverResult<Vec<String>> + 'a) -> Self {
        self.required_users.push(Box::new(producer));
        self
    }

    /// Set the chain authorization producer.
    pub fn require_chain_auth(
        mut self,
        producer: impl Fn() -> RiverResult<Option<ChainAuthArgs>> + 'a,
    ) -> Self {
        self.chain_auth = Some(Box::new(producer));
        self
    }

    /// Add a single derived event.
    pub fn require_derived_event(
        mut self,
        producer: impl Fn() -> RiverResult<DerivedEvent> + 'a,
    ) -> Self {
        self.derived_events
            .push(Box::new(move || producer().map(|event| vec![event])));
        self
    }

    /// Add a list of derived events.
    pub fn require_derived_events(
        mut self,
        producer: impl Fn() -> RiverResult<Vec<DerivedEvent>> + 'a,
    ) -> Self {
        self.derived_events.push(Box::new(producer));
        self
    }

    /// Reject unconditionally.
    pub fn fail(mut self, err: RiverError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Evaluate the rule.
    pub fn run(&self) -> RiverResult<CreateStreamRules> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        for check in &self.checks {
            check()?;
        }
        let required_memberships = collect(&self.required_memberships)?;
        let required_users = collect(&self.required_users)?;
        let chain_auth = match &self.chain_auth {
            Some(producer) => producer()?,
            None => None,
        };
        let derived_events = collect(&self.derived_events)?;
        Ok(CreateStreamRules {
            creator_stream_id: self.creator_stream_id.clone(),
            required_users,
            required_memberships,
            chain_auth,
            derived_events,
        })
    }
}

fn collect<T>(producers: &[ListProducer<'_, T>]) -> RiverResult<Vec<T>> {
    let mut out = Vec::new();
    for producer in producers {
        out.extend(producer()?);
    }
    Ok(out)
}

impl fmt::Debug for CreateStreamRuleBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateStreamRuleBuilder")
            .field("creator_stream_id", &self.creator_stream_id)
            .field("checks", &self.checks.len())
            .field("required_memberships", &self.required_memberships.len())
            .field("required_users", &self.required_users.len())
            .field("chain_auth", &self.chain_auth.is_some())
            .field("derived_events", &self.derived_events.len())
            .field("failure", &self.failure)
            .finish()
    }
}
