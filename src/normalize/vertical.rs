use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::probe;
use super::{collect_records, unwrap_list, Contract, Envelope, SchemaKind};
use crate::error::ContractError;

const ID: &[&str] = &["id", "vertical_id"];
const NAME: &[&str] = &["name", "label", "title"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertical {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl Vertical {
  pub fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    let object = raw
      .as_object()
      .ok_or_else(|| ContractError::new(SchemaKind::Verticals, "record is not an object"))?;
    let id = probe::identifier(raw, ID)
      .ok_or_else(|| ContractError::new(SchemaKind::Verticals, "missing required field `id`"))?;
    Ok(Self {
      name: probe::text(raw, NAME).unwrap_or_else(|| id.clone()),
      extra: probe::extras(object, &[ID, NAME].concat()),
      id,
    })
  }
}

pub struct VerticalList;

impl Contract for VerticalList {
  type Output = Vec<Vertical>;

  const KIND: SchemaKind = SchemaKind::Verticals;

  fn normalize(raw: &Value) -> Result<Vec<Vertical>, ContractError> {
    let list = unwrap_list(
      Self::KIND,
      raw,
      &[Envelope::Bare, Envelope::Items, Envelope::NestedItems, Envelope::Results],
    )?;
    Ok(collect_records(Self::KIND, list.records, Vertical::from_raw).0)
  }
}
