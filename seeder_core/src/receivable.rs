//! The receivable document and its adjustment entries.
//!
//! Field names follow the document shape read by the query layer, which is why
//! the serialized names differ from the Rust ones.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Cancellation reasons, stored verbatim in the `motivo` field.
pub const CANCELLATION_REASONS: [&str; 7] = [
    "Cliente solicitou cancelamento parcial.",
    "Ajuste de valor por erro operacional.",
    "Negociação comercial com o cliente.",
    "Desconto promocional aplicado.",
    "Cancelamento por inadimplência.",
    "Renegociação de dívida.",
    "Ajuste contratual.",
];

/// A synthetic receivable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receivable {
    /// Document key in the sink.
    #[serde(rename = "id_recebivel")]
    pub id: String,
    #[serde(rename = "codigo_cliente")]
    pub customer_code: String,
    #[serde(rename = "codigo_produto")]
    pub product_code: u32,
    #[serde(rename = "codigo_produto_parceiro")]
    pub partner_product_code: u32,
    #[serde(rename = "modalidade")]
    pub modality: u32,
    #[serde(rename = "valor_original")]
    pub face_value: f64,
    #[serde(rename = "data_vencimento")]
    pub due_date: NaiveDate,
    #[serde(
        rename = "cancelamentos",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cancellations: Vec<Cancellation>,
    #[serde(rename = "negociacoes", default, skip_serializing_if = "Vec::is_empty")]
    pub negotiations: Vec<Negotiation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    #[serde(rename = "id_cancelamento")]
    pub id: String,
    #[serde(rename = "data_cancelamento")]
    pub date: NaiveDate,
    #[serde(rename = "valor_cancelado")]
    pub amount: f64,
    #[serde(rename = "motivo")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    #[serde(rename = "id_negociacao")]
    pub id: String,
    #[serde(rename = "data_negociacao")]
    pub date: NaiveDate,
    #[serde(rename = "valor_negociado")]
    pub amount: f64,
}

/// Adjustments synthesized for a receivable. A receivable carries at most one kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Adjustments {
    #[default]
    None,
    Cancellations(Vec<Cancellation>),
    Negotiations(Vec<Negotiation>),
}

impl Receivable {
    /// Sum of all adjustment amounts, in the same unit as the face value.
    pub fn adjusted_total(&self) -> f64 {
        let cents: i64 = self
            .cancellations
            .iter()
            .map(|c| to_cents(c.amount))
            .chain(self.negotiations.iter().map(|n| to_cents(n.amount)))
            .sum();
        from_cents(cents)
    }

    /// Face value minus every adjustment.
    pub fn outstanding_balance(&self) -> f64 {
        from_cents(to_cents(self.face_value) - to_cents(self.adjusted_total()))
    }

    pub fn set_adjustments(&mut self, adjustments: Adjustments) {
        self.cancellations.clear();
        self.negotiations.clear();
        match adjustments {
            Adjustments::None => {}
            Adjustments::Cancellations(c) => self.cancellations = c,
            Adjustments::Negotiations(n) => self.negotiations = n,
        }
    }
}

/// Takes `share` of an amount in cents, truncating toward zero at the cent.
///
/// Half of 266.67 is 133.335, which becomes 133.33.
pub(crate) fn share_of_cents(cents: i64, share: f64) -> i64 {
    (cents as f64 * share).trunc() as i64
}

/// Converts an amount that is already a whole number of cents.
///
/// Rounds to absorb representation error, unlike [`share_of_cents`].
pub(crate) fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

pub(crate) fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Index mapping used when creating the receivables collection.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id_recebivel": { "type": "keyword" },
                "codigo_cliente": { "type": "keyword" },
                "codigo_produto": { "type": "integer" },
                "codigo_produto_parceiro": { "type": "integer" },
                "modalidade": { "type": "integer" },
                "valor_original": { "type": "double" },
                "data_vencimento": { "type": "date", "format": "yyyy-MM-dd" },
                "cancelamentos": {
                    "type": "nested",
                    "properties": {
                        "id_cancelamento": { "type": "keyword" },
                        "data_cancelamento": { "type": "date", "format": "yyyy-MM-dd" },
                        "valor_cancelado": { "type": "double" },
                        "motivo": { "type": "text" }
                    }
                },
                "negociacoes": {
                    "type": "nested",
                    "properties": {
                        "id_negociacao": { "type": "keyword" },
                        "data_negociacao": { "type": "date", "format": "yyyy-MM-dd" },
                        "valor_negociado": { "type": "double" }
                    }
                }
            }
        }
    })
}
