use crate::backend::RegisterResponse;

/// Attribution outcome carried by a backend response. Presence means the
/// backend asserted resolution; `is_asa_user` tells whether the install
/// originated from the tracked campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributionOutcome {
    pub is_asa_user: bool,
}

/// Result of reconciling a register response into a flow decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterReconciliation {
    /// A user record exists server-side. `inferred` marks the compensation
    /// path where the backend omitted the created flag but resolved
    /// attribution positively in the same response; callers log that path
    /// distinctly from the explicit one.
    Created {
        user_id: String,
        inferred: bool,
        attribution: Option<AttributionOutcome>,
    },
    /// Attribution resolved negative. The backend does not persist
    /// non-campaign users, so the user must NOT be marked created even
    /// though the flow is terminal.
    NonCampaign,
    /// The response did not establish creation; the register operation is
    /// retryable. Any embedded attribution outcome is still applied, exactly
    /// as a standalone resolve response would be.
    Inconclusive { attribution: Option<AttributionOutcome> },
}

/// Reconcile an ambiguous register response into a single decision.
///
/// The backend is allowed to omit fields, so the rules below are applied in
/// order of precedence:
///
/// 1. `attribution_resolved == true` with `originated_from_campaign != true`
///    → [`RegisterReconciliation::NonCampaign`], regardless of any user id.
/// 2. A user id with an explicit `user_created == true` → `Created`
///    (explicit path).
/// 3. A user id with the created flag omitted, but attribution resolved
///    positively in the same response → `Created` with `inferred: true`.
///    This compensates for a backend that drops the created flag for
///    campaign users; it is heuristic and deliberately isolated here.
/// 4. Anything else → `Inconclusive`, carrying whatever attribution outcome
///    the response asserted.
pub fn reconcile_register_response(response: &RegisterResponse) -> RegisterReconciliation {
    let attribution = if response.attribution_resolved == Some(true) {
        Some(AttributionOutcome {
            is_asa_user: response.originated_from_campaign == Some(true),
        })
    } else {
        None
    };

    if let Some(outcome) = attribution {
        if !outcome.is_asa_user {
            return RegisterReconciliation::NonCampaign;
        }
    }

    if let Some(user_id) = response.user_id.as_deref() {
        if response.user_created == Some(true) {
            return RegisterReconciliation::Created {
                user_id: user_id.to_owned(),
                inferred: false,
                attribution,
            };
        }
        if attribution.is_some() {
            return RegisterReconciliation::Created {
                user_id: user_id.to_owned(),
                inferred: true,
                attribution,
            };
        }
    }

    RegisterReconciliation::Inconclusive { attribution }
}
