use std::sync::Arc;
use std::time::Duration;

use pedido_core::{Intent, TurnFailure};

use crate::llm::NluEngine;
use crate::profiles::InstructionProfile;

pub struct IntentClassifier {
    nlu: Arc<dyn NluEngine>,
    deadline: Duration,
}

impl IntentClassifier {
    pub fn new(nlu: Arc<dyn NluEngine>, deadline: Duration) -> Self {
        Self { nlu, deadline }
    }

    /// The trimmed label must match exactly; anything else is
    /// [`Intent::NotRelated`]. Engine failures and timeouts are reported so
    /// the router can fall back.
    pub async fn classify(&self, utterance: &str) -> Result<Intent, TurnFailure> {
        let generated = tokio::time::timeout(
            self.deadline,
            self.nlu.generate(InstructionProfile::IntentClassification, utterance),
        )
        .await
        .map_err(|_| {
            TurnFailure::Classification(format!(
                "no label within {}ms",
                self.deadline.as_millis()
            ))
        })?
        .map_err(|error| TurnFailure::Classification(error.to_string()))?;

        Ok(Intent::from_label(&generated))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use pedido_core::{Intent, TurnFailure};

    use super::IntentClassifier;
    use crate::llm::{NluEngine, NluError, ScriptedNlu};
    use crate::profiles::InstructionProfile;

    struct SlowNlu;

    #[async_trait]
    impl NluEngine for SlowNlu {
        async fn generate(&self, _: InstructionProfile, _: &str) -> Result<String, NluError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("list_prices".to_string())
        }
    }

    fn classifier(nlu: ScriptedNlu) -> IntentClassifier {
        IntentClassifier::new(Arc::new(nlu), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn known_labels_map_to_intents() {
        let nlu = ScriptedNlu::new()
            .respond(InstructionProfile::IntentClassification, "place_order\n")
            .respond(InstructionProfile::IntentClassification, "  confirm_order ");
        let classifier = classifier(nlu);

        assert_eq!(classifier.classify("2 cafés").await, Ok(Intent::PlaceOrder));
        assert_eq!(classifier.classify("confirmar").await, Ok(Intent::ConfirmOrder));
    }

    #[tokio::test]
    async fn unknown_labels_are_not_related() {
        let nlu = ScriptedNlu::new()
            .respond(InstructionProfile::IntentClassification, "weather_report");
        assert_eq!(classifier(nlu).classify("hola").await, Ok(Intent::NotRelated));
    }

    #[tokio::test]
    async fn decorated_or_recased_labels_are_not_related() {
        let nlu = ScriptedNlu::new()
            .respond(InstructionProfile::IntentClassification, "CONFIRM_ORDER")
            .respond(InstructionProfile::IntentClassification, "\"place_order\"")
            .respond(InstructionProfile::IntentClassification, "list_prices.");
        let classifier = classifier(nlu);

        assert_eq!(classifier.classify("sí").await, Ok(Intent::NotRelated));
        assert_eq!(classifier.classify("2 cafés").await, Ok(Intent::NotRelated));
        assert_eq!(classifier.classify("precios").await, Ok(Intent::NotRelated));
    }

    #[tokio::test]
    async fn engine_failure_is_a_classification_failure() {
        let nlu = ScriptedNlu::new().fail(InstructionProfile::IntentClassification, "down");
        let error = classifier(nlu).classify("hola").await.expect_err("must fail");
        assert_eq!(error.kind(), "classification");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_engine_hits_the_deadline() {
        let classifier = IntentClassifier::new(Arc::new(SlowNlu), Duration::from_secs(2));
        let error = classifier.classify("hola").await.expect_err("must time out");
        assert!(matches!(error, TurnFailure::Classification(ref detail) if detail.contains("2000ms")));
    }
}
