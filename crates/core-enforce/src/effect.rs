//! Folding per-rule effects into a final decision.
//!
//! The model's `policy_effect` section declares one of four combination
//! rules. For every enforcement a fresh [`EffectStream`] is created;
//! the matcher driver offers it each matching rule's effect and stops
//! iterating the moment the stream decides. When the rule stream ends
//! without a decision, [`EffectStream::conclude`] commits one.

use crate::error::{EnforceError, Result};
use serde::{Deserialize, Serialize};

/// Per-rule effect, read from the policy definition's `eft` column.
/// A missing column means [`Effect::Allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// The rule permits the request
    Allow,
    /// The rule forbids the request
    Deny,
    /// The rule does not contribute
    Indeterminate,
}

impl Effect {
    /// Map an `eft` column token to an effect; unknown tokens do not
    /// contribute.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "allow" => Effect::Allow,
            "deny" => Effect::Deny,
            _ => Effect::Indeterminate,
        }
    }
}

/// Terminal outcome of an enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The request is permitted
    Allow,
    /// The request is denied
    Deny,
}

/// Outcome of offering one effect to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep streaming rules
    Continue,
    /// Stop: the decision is final
    Decide(Decision),
}

/// Creates per-decision effect streams
pub trait Effector: Send + Sync {
    /// Begin a new decision
    fn start(&self) -> Box<dyn EffectStream>;
}

/// Stateful fold over one decision's effect sequence
pub trait EffectStream: Send {
    /// Offer the effect of the next matching rule
    fn push(&mut self, effect: Effect) -> Verdict;

    /// Commit a decision after the rule stream ended without one
    fn conclude(&self) -> Decision;

    /// Indices (in offer order) of the rules that carried the decision
    fn explanations(&self) -> &[usize];
}

/// The four recognised combination rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// `some(where (p_eft == allow))`: allow as soon as one rule
    /// allows; nothing allowed means deny.
    AllowOverride,
    /// `!some(where (p_eft == deny))`: allow by default, deny as soon
    /// as one rule denies.
    DenyOverride,
    /// `some(where (p_eft == allow)) && !some(where (p_eft == deny))`:
    /// deny wins immediately; otherwise at least one allow is required.
    AllowAndDeny,
    /// `priority(p_eft) || deny`: the first non-indeterminate effect in
    /// stream order wins; an empty stream denies.
    Priority,
}

impl EffectKind {
    /// Recognise a `policy_effect` expression
    ///
    /// # Errors
    ///
    /// Unknown expressions are a model-shape error.
    pub fn parse(expr: &str) -> Result<Self> {
        let canon: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        match canon.as_str() {
            "some(where(p_eft==allow))" => Ok(Self::AllowOverride),
            "!some(where(p_eft==deny))" => Ok(Self::DenyOverride),
            "some(where(p_eft==allow))&&!some(where(p_eft==deny))" => Ok(Self::AllowAndDeny),
            "priority(p_eft)||deny" => Ok(Self::Priority),
            _ => Err(EnforceError::shape(format!(
                "unsupported policy effect `{expr}`"
            ))),
        }
    }
}

/// [`Effector`] implementing the four built-in combination rules
#[derive(Debug, Clone, Copy)]
pub struct DefaultEffector {
    kind: EffectKind,
}

impl DefaultEffector {
    /// Create an effector for the given combination rule
    #[must_use]
    pub fn new(kind: EffectKind) -> Self {
        Self { kind }
    }

    /// The combination rule in use
    #[must_use]
    pub fn kind(&self) -> EffectKind {
        self.kind
    }
}

impl Effector for DefaultEffector {
    fn start(&self) -> Box<dyn EffectStream> {
        Box::new(DefaultEffectStream {
            kind: self.kind,
            index: 0,
            saw_allow: false,
            explanations: Vec::new(),
        })
    }
}

struct DefaultEffectStream {
    kind: EffectKind,
    index: usize,
    saw_allow: bool,
    explanations: Vec<usize>,
}

impl EffectStream for DefaultEffectStream {
    fn push(&mut self, effect: Effect) -> Verdict {
        let index = self.index;
        self.index += 1;

        match (self.kind, effect) {
            (EffectKind::AllowOverride, Effect::Allow) => {
                self.explanations.push(index);
                Verdict::Decide(Decision::Allow)
            }
            (EffectKind::DenyOverride, Effect::Deny)
            | (EffectKind::AllowAndDeny, Effect::Deny) => {
                self.explanations.clear();
                self.explanations.push(index);
                Verdict::Decide(Decision::Deny)
            }
            (EffectKind::AllowAndDeny, Effect::Allow) => {
                self.saw_allow = true;
                self.explanations.push(index);
                Verdict::Continue
            }
            (EffectKind::Priority, Effect::Allow) => {
                self.explanations.push(index);
                Verdict::Decide(Decision::Allow)
            }
            (EffectKind::Priority, Effect::Deny) => {
                self.explanations.push(index);
                Verdict::Decide(Decision::Deny)
            }
            _ => Verdict::Continue,
        }
    }

    fn conclude(&self) -> Decision {
        match self.kind {
            EffectKind::AllowOverride | EffectKind::Priority => Decision::Deny,
            EffectKind::DenyOverride => Decision::Allow,
            EffectKind::AllowAndDeny => {
                if self.saw_allow {
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
        }
    }

    fn explanations(&self) -> &[usize] {
        &self.explanations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(kind: EffectKind, effects: &[Effect]) -> (Decision, Vec<usize>) {
        let effector = DefaultEffector::new(kind);
        let mut stream = effector.start();
        for &effect in effects {
            if let Verdict::Decide(decision) = stream.push(effect) {
                return (decision, stream.explanations().to_vec());
            }
        }
        (stream.conclude(), stream.explanations().to_vec())
    }

    #[test]
    fn parse_canonical_expressions() {
        assert_eq!(
            EffectKind::parse("some(where (p_eft == allow))").unwrap(),
            EffectKind::AllowOverride
        );
        assert_eq!(
            EffectKind::parse("!some(where (p_eft == deny))").unwrap(),
            EffectKind::DenyOverride
        );
        assert_eq!(
            EffectKind::parse("some(where (p_eft == allow)) && !some(where (p_eft == deny))")
                .unwrap(),
            EffectKind::AllowAndDeny
        );
        assert_eq!(
            EffectKind::parse("priority(p_eft) || deny").unwrap(),
            EffectKind::Priority
        );
        assert!(EffectKind::parse("most(of(p_eft))").is_err());
    }

    #[test]
    fn allow_override() {
        use Effect::*;
        assert_eq!(
            drive(EffectKind::AllowOverride, &[Indeterminate, Allow]).0,
            Decision::Allow
        );
        assert_eq!(
            drive(EffectKind::AllowOverride, &[Deny, Indeterminate]).0,
            Decision::Deny
        );
        assert_eq!(drive(EffectKind::AllowOverride, &[]).0, Decision::Deny);
    }

    #[test]
    fn deny_override() {
        use Effect::*;
        assert_eq!(
            drive(EffectKind::DenyOverride, &[Allow, Allow]).0,
            Decision::Allow
        );
        assert_eq!(
            drive(EffectKind::DenyOverride, &[Allow, Deny]).0,
            Decision::Deny
        );
        assert_eq!(drive(EffectKind::DenyOverride, &[]).0, Decision::Allow);
    }

    #[test]
    fn allow_and_deny() {
        use Effect::*;
        assert_eq!(
            drive(EffectKind::AllowAndDeny, &[Allow, Deny]).0,
            Decision::Deny
        );
        assert_eq!(
            drive(EffectKind::AllowAndDeny, &[Allow, Indeterminate]).0,
            Decision::Allow
        );
        // No allow observed: denied even without an explicit deny.
        assert_eq!(
            drive(EffectKind::AllowAndDeny, &[Indeterminate]).0,
            Decision::Deny
        );
    }

    #[test]
    fn deny_short_circuits() {
        let effector = DefaultEffector::new(EffectKind::DenyOverride);
        let mut stream = effector.start();
        assert_eq!(stream.push(Effect::Allow), Verdict::Continue);
        assert_eq!(
            stream.push(Effect::Deny),
            Verdict::Decide(Decision::Deny)
        );
    }

    #[test]
    fn priority_first_wins() {
        use Effect::*;
        assert_eq!(
            drive(EffectKind::Priority, &[Indeterminate, Deny, Allow]).0,
            Decision::Deny
        );
        assert_eq!(
            drive(EffectKind::Priority, &[Allow, Deny]).0,
            Decision::Allow
        );
        assert_eq!(drive(EffectKind::Priority, &[]).0, Decision::Deny);
    }

    #[test]
    fn explanations_point_at_deciders() {
        use Effect::*;
        let (decision, expl) = drive(EffectKind::AllowAndDeny, &[Allow, Indeterminate, Deny]);
        assert_eq!(decision, Decision::Deny);
        assert_eq!(expl, vec![2]);

        let (decision, expl) = drive(EffectKind::AllowOverride, &[Indeterminate, Allow]);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(expl, vec![1]);
    }

    #[test]
    fn effect_from_token() {
        assert_eq!(Effect::from_token("allow"), Effect::Allow);
        assert_eq!(Effect::from_token("deny"), Effect::Deny);
        assert_eq!(Effect::from_token("audit"), Effect::Indeterminate);
    }
}
