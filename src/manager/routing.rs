//! Declarative send routing.
//!
//! Each transport state maps to a [`SendPlan`]: an ordered list of routes to
//! try and the condition under which a failed step falls through to the
//! next one.
//!
//! | Transport | Steps |
//! |-----------|-------|
//! | socket | socket (only if not open) → local HTTP |
//! | http | local HTTP |
//! | tunnel | tunnel |
//! | relay | local HTTP (on connect failure) → relay enqueue |
//! | none | (empty) → `NotConnected` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

use super::state::Transport;

// ============================================================================
// Route
// ============================================================================

/// A concrete path a single send can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Correlated request over the persistent socket.
    Socket,
    /// `POST /api/{command}` on the local backend.
    LocalHttp,
    /// `POST /api/{command}` on the tunnel.
    Tunnel,
    /// Enqueue into the relay store.
    Relay,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Socket => "socket",
            Self::LocalHttp => "local-http",
            Self::Tunnel => "tunnel",
            Self::Relay => "relay",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Step
// ============================================================================

/// When a failed step hands over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallthrough {
    /// Errors are returned to the caller.
    Never,
    /// Connect failures advance the plan; the step is an opportunistic
    /// upgrade bounded by `http_probe_timeout`.
    OnUnreachable,
}

/// One entry of a [`SendPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Route to attempt.
    pub route: Route,
    /// Error handling for this step.
    pub fallthrough: Fallthrough,
}

impl Step {
    const fn new(route: Route, fallthrough: Fallthrough) -> Self {
        Self { route, fallthrough }
    }
}

// ============================================================================
// SendPlan
// ============================================================================

const SOCKET_PLAN: &[Step] = &[
    Step::new(Route::Socket, Fallthrough::Never),
    Step::new(Route::LocalHttp, Fallthrough::Never),
];
const HTTP_PLAN: &[Step] = &[Step::new(Route::LocalHttp, Fallthrough::Never)];
const TUNNEL_PLAN: &[Step] = &[Step::new(Route::Tunnel, Fallthrough::Never)];
const RELAY_PLAN: &[Step] = &[
    Step::new(Route::LocalHttp, Fallthrough::OnUnreachable),
    Step::new(Route::Relay, Fallthrough::Never),
];

/// Ordered routes for one transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPlan {
    steps: &'static [Step],
}

impl SendPlan {
    /// Returns the plan for `transport`.
    #[must_use]
    pub const fn for_transport(transport: Transport) -> Self {
        let steps = match transport {
            Transport::Socket => SOCKET_PLAN,
            Transport::Http => HTTP_PLAN,
            Transport::Tunnel => TUNNEL_PLAN,
            Transport::Relay => RELAY_PLAN,
            Transport::None => &[],
        };
        Self { steps }
    }

    /// Returns the steps in order.
    #[inline]
    #[must_use]
    pub const fn steps(&self) -> &'static [Step] {
        self.steps
    }

    /// Returns `true` if nothing can be attempted.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the routes in order.
    pub fn routes(&self) -> impl Iterator<Item = Route> + '_ {
        self.steps.iter().map(|step| step.route)
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Outcome of attempting one route.
#[derive(Debug)]
pub enum Attempt {
    /// The route ran; this is its result.
    Done(Result<Value>),
    /// The route could not be used at all (channel missing or closed).
    Unavailable,
}

/// Runs `plan`, calling `attempt` for each step until one settles.
///
/// An [`Attempt::Unavailable`] route always advances. A failed route
/// advances only under [`Fallthrough::OnUnreachable`] and only when the
/// error never reached the backend.
///
/// # Errors
///
/// - [`Error::NotConnected`] if the plan is empty or every route was unavailable
/// - The error of the step that settled the send
pub async fn execute<F, Fut>(plan: SendPlan, mut attempt: F) -> Result<Value>
where
    F: FnMut(Step) -> Fut,
    Fut: Future<Output = Attempt>,
{
    let mut last_error = None;

    for step in plan.steps() {
        match attempt(*step).await {
            Attempt::Done(Ok(value)) => return Ok(value),
            Attempt::Done(Err(e)) => {
                let advance = step.fallthrough == Fallthrough::OnUnreachable && e.is_unreachable();
                if !advance {
                    return Err(e);
                }
                debug!(route = %step.route, error = %e, "Route unreachable, falling through");
                last_error = Some(e);
            }
            Attempt::Unavailable => {
                debug!(route = %step.route, "Route unavailable, falling through");
            }
        }
    }

    Err(last_error.unwrap_or(Error::NotConnected))
}

// ============================================================================
// Tests
// ============================================================================
