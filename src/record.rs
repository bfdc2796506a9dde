//! Card records – the immutable input of a rendering run.
//!
//! Records arrive either in the crate's own snake_case shape or straight
//! from the listing service (camelCase wire names, photograph as a Node
//! buffer object). Both deserialise into [`CardRecord`] via [`RecordInput`].

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

/// One operator card.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardRecord {
    #[serde(default)]
    pub id: u64,
    pub folio: String,
    #[serde(default)]
    pub operator_folio: String,
    #[serde(default)]
    pub issue_date: String,
    #[serde(default)]
    pub expiry_date: String,
    #[serde(default)]
    pub procedure_type: String,
    #[serde(default)]
    pub coordination: String,
    #[serde(default)]
    pub operator_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default)]
    pub modality: String,
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub admin_folio: String,
    #[serde(default)]
    pub payment_folio: String,
    #[serde(default)]
    pub photograph: Option<Photograph>,
    #[serde(default)]
    pub legacy_issue_date: Option<String>,
    #[serde(default)]
    pub registered_on: Option<String>,
}

impl CardRecord {
    /// Raw photograph bytes, if any were supplied.
    pub fn photograph_bytes(&self) -> Option<&[u8]> {
        self.photograph
            .as_ref()
            .map(Photograph::as_bytes)
            .filter(|b| !b.is_empty())
    }

    /// Display label for the two-valued modality domain.
    pub fn modality_label(&self) -> &'static str {
        modality_label(&self.modality)
    }

    pub fn status(&self) -> CardStatus {
        CardStatus::from_label(&self.status)
    }
}

/// `"INDIVIDUAL"` reads "Individual"; every other modality is collective
/// transport.
pub fn modality_label(modality: &str) -> &'static str {
    if modality == "INDIVIDUAL" {
        "Individual"
    } else {
        "Transporte Colectivo"
    }
}

/// Card status as reported by the listing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardStatus {
    Valid,
    Delivered,
    Expired,
    Suspended,
    Other,
}

impl CardStatus {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Vigente" => CardStatus::Valid,
            "Entregado" => CardStatus::Delivered,
            "Vencido" => CardStatus::Expired,
            "Suspendido" => CardStatus::Suspended,
            _ => CardStatus::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Photograph payload
// ---------------------------------------------------------------------------

/// Raw photograph bytes. Malformed encodings collapse to an empty buffer,
/// which the template treats as "no photograph".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Photograph(Vec<u8>);

impl Photograph {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Photograph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Photograph({} bytes)", self.0.len())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhotographRepr {
    /// Node's JSON form of a `Buffer`: `{"type": "Buffer", "data": [..]}`.
    Buffer { data: Vec<u8> },
    Bytes(Vec<u8>),
    Base64(String),
    /// Anything else, e.g. a Buffer object without `data` or with
    /// out-of-range bytes.
    Unrecognised(IgnoredAny),
}

impl<'de> Deserialize<'de> for Photograph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = match PhotographRepr::deserialize(deserializer)? {
            PhotographRepr::Buffer { data } | PhotographRepr::Bytes(data) => data,
            PhotographRepr::Base64(text) => {
                let payload = match text.split_once(";base64,") {
                    Some((_, data)) => data,
                    None => text.as_str(),
                };
                match BASE64_STD.decode(payload.trim()) {
                    Ok(b) => b,
                    Err(e) => {
                        log::warn!("Ignoring photograph: base64 decode error: {e}");
                        Vec::new()
                    }
                }
            }
            PhotographRepr::Unrecognised(_) => {
                log::warn!("Ignoring photograph: unrecognised payload shape");
                Vec::new()
            }
        };
        Ok(Photograph(bytes))
    }
}

// ---------------------------------------------------------------------------
// Listing-service wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

/// A record exactly as the listing service returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    id_tarjeton: WireId,
    #[serde(default)]
    folio_operador: String,
    #[serde(default)]
    emision: String,
    #[serde(default)]
    vence: String,
    #[serde(default)]
    tramite: String,
    #[serde(default)]
    coordinacion: String,
    #[serde(default)]
    nombre_operador: String,
    #[serde(default)]
    genero: String,
    #[serde(default)]
    municipio: String,
    #[serde(default)]
    modalidad: String,
    #[serde(default)]
    tipo_tarjeton: String,
    #[serde(default)]
    estatus: String,
    #[serde(default)]
    folio_administrativo: String,
    #[serde(default)]
    folio_pago: String,
    #[serde(default)]
    fotografia: Option<Photograph>,
    #[serde(default)]
    fecha_emision_antigua: Option<String>,
    #[serde(default)]
    fecha_alta: Option<String>,
}

impl From<CatalogEntry> for CardRecord {
    fn from(e: CatalogEntry) -> Self {
        let (id, folio) = match e.id_tarjeton {
            WireId::Number(n) => (n, n.to_string()),
            WireId::Text(s) => (s.trim().parse().unwrap_or_default(), s),
        };
        CardRecord {
            id,
            folio,
            operator_folio: e.folio_operador,
            issue_date: e.emision,
            expiry_date: e.vence,
            procedure_type: e.tramite,
            coordination: e.coordinacion,
            operator_name: e.nombre_operador,
            gender: e.genero,
            municipality: e.municipio,
            modality: e.modalidad,
            card_type: e.tipo_tarjeton,
            status: e.estatus,
            admin_folio: e.folio_administrativo,
            payment_folio: e.folio_pago,
            photograph: e.fotografia,
            legacy_issue_date: e.fecha_emision_antigua,
            registered_on: e.fecha_alta,
        }
    }
}

/// Either record shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordInput {
    Native(CardRecord),
    Catalog(CatalogEntry),
}

impl From<RecordInput> for CardRecord {
    fn from(input: RecordInput) -> Self {
        match input {
            RecordInput::Native(r) => r,
            RecordInput::Catalog(e) => e.into(),
        }
    }
}

/// Parse a JSON document holding one record or an array of records.
pub fn records_from_json(json: &str) -> Result<Vec<CardRecord>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<RecordInput>),
        One(Box<RecordInput>),
    }

    Ok(match serde_json::from_str::<OneOrMany>(json)? {
        OneOrMany::Many(items) => items.into_iter().map(CardRecord::from).collect(),
        OneOrMany::One(item) => vec![CardRecord::from(*item)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_mapping() {
        assert_eq!(modality_label("INDIVIDUAL"), "Individual");
        assert_eq!(modality_label("TRANSPORTE COLECTIVO"), "Transporte Colectivo");
        assert_eq!(modality_label("individual"), "Transporte Colectivo");
        assert_eq!(modality_label(""), "Transporte Colectivo");
    }

    #[test]
    fn native_record_with_buffer_photo() {
        let json = r#"{
            "folio": "12345",
            "operator_name": "Juan Pérez",
            "photograph": {"type": "Buffer", "data": [255, 216, 255]}
        }"#;
        let records = records_from_json(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].folio, "12345");
        assert_eq!(records[0].photograph_bytes(), Some(&[255u8, 216, 255][..]));
    }

    #[test]
    fn catalog_entry_maps_wire_names() {
        let json = r#"[{
            "idTarjeton": 987,
            "folioOperador": "OP-1",
            "emision": "01/06/2020",
            "vence": "01/06/2024",
            "tramite": "Renovación",
            "nombreOperador": "Ana",
            "modalidad": "INDIVIDUAL",
            "tipoTarjeton": "A",
            "estatus": "Vigente",
            "folioAdministrativo": "ADM",
            "folioPago": "PAG",
            "fotografia": null
        }]"#;
        let records = records_from_json(json).unwrap();
        let r = &records[0];
        assert_eq!(r.id, 987);
        assert_eq!(r.folio, "987");
        assert_eq!(r.operator_folio, "OP-1");
        assert_eq!(r.procedure_type, "Renovación");
        assert_eq!(r.card_type, "A");
        assert_eq!(r.status(), CardStatus::Valid);
        assert!(r.photograph_bytes().is_none());
    }

    #[test]
    fn bad_base64_photo_degrades_to_absent() {
        let json = r#"{"folio": "1", "photograph": "%%%not base64%%%"}"#;
        let records = records_from_json(json).unwrap();
        assert!(records[0].photograph_bytes().is_none());
    }

    #[test]
    fn malformed_buffer_photo_degrades_to_absent() {
        let json = r#"[
            {"folio": "1", "photograph": {"type": "Buffer"}},
            {"folio": "2", "photograph": {"type": "Buffer", "data": [300]}},
            {"folio": "3", "photograph": 42}
        ]"#;
        let records = records_from_json(json).unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert!(record.photograph_bytes().is_none(), "folio {}", record.folio);
        }
        assert_eq!(records[1].folio, "2");
    }

    #[test]
    fn base64_data_uri_photo() {
        let json = r#"{"folio": "1", "photograph": "data:image/png;base64,AQID"}"#;
        let records = records_from_json(json).unwrap();
        assert_eq!(records[0].photograph_bytes(), Some(&[1u8, 2, 3][..]));
    }
}
