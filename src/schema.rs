//! Static registry of entity types, their writable columns and field kinds.
//!
//! The registry is the only source of column names that ever reach SQL text.
//! Changing it is a deployment-time operation; nothing mutates it at runtime.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::time::{parse_date, parse_instant_ms};
use crate::{AppError, AppResult};

/// Closed set of accepted spellings for an enumerated column.
#[derive(Debug, PartialEq, Eq)]
pub struct ChoiceSet {
    pub values: &'static [&'static str],
    /// Legacy spellings mapped onto a canonical value.
    pub aliases: &'static [(&'static str, &'static str)],
}

impl ChoiceSet {
    /// Case-insensitive lookup returning the canonical spelling.
    pub fn canonical(&self, raw: &str) -> Option<&'static str> {
        let raw = raw.trim();
        self.values
            .iter()
            .copied()
            .find(|value| value.eq_ignore_ascii_case(raw))
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|(alias, _)| alias.eq_ignore_ascii_case(raw))
                    .map(|(_, canonical)| *canonical)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Bool,
    /// Calendar date, stored as `YYYY-MM-DD`.
    Date,
    /// Instant, stored as epoch milliseconds.
    Timestamp,
    Choice(&'static ChoiceSet),
    /// Weak reference to a `family_members` row owned by the same user.
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// False when the column has a storage default and may not be cleared.
    pub nullable: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub label: &'static str,
    pub columns: &'static [ColumnDef],
}

/// Columns present on every entity table but never writable through a payload.
pub const SERVER_MANAGED: &[&str] = &["id", "user_id", "created_at", "updated_at"];

/// Response-only fields added when records are shaped for display.
pub const DERIVED: &[&str] = &["files", "family_member_name"];

/// Reminder columns that only change through engine transitions.
pub const ENGINE_MANAGED: &[&str] = &["snooze_until", "snooze_count"];

/// Keys a client may send back unchanged but can never write.
pub fn is_read_only(key: &str) -> bool {
    SERVER_MANAGED.contains(&key) || ENGINE_MANAGED.contains(&key) || DERIVED.contains(&key)
}

/// Columns that act as the default search surface when present in a schema.
pub const NAMEABLE: &[&str] = &["name", "title", "business_name", "holder_name", "company_name"];

pub static REMINDER_STATUS: ChoiceSet = ChoiceSet {
    values: &["Active", "Completed", "Cancelled"],
    aliases: &[("pending", "Active")],
};

static PRIORITY: ChoiceSet = ChoiceSet {
    values: &["low", "medium", "high"],
    aliases: &[],
};

static REPEAT_TYPE: ChoiceSet = ChoiceSet {
    values: &["None", "Daily", "Weekly", "Monthly", "Yearly"],
    aliases: &[],
};

static TRANSACTION_TYPE: ChoiceSet = ChoiceSet {
    values: &["Credit", "Debit"],
    aliases: &[],
};

static LOAN_STATUS: ChoiceSet = ChoiceSet {
    values: &["Active", "Closed", "Overdue", "Pending"],
    aliases: &[],
};

static CARD_TYPE: ChoiceSet = ChoiceSet {
    values: &["Credit", "Debit", "Prepaid", "Forex"],
    aliases: &[],
};

static CARD_NETWORK: ChoiceSet = ChoiceSet {
    values: &["Visa", "MasterCard", "Amex", "Rupay", "Diners Club"],
    aliases: &[],
};

static CARD_STATUS: ChoiceSet = ChoiceSet {
    values: &["Active", "Blocked", "Expired", "Lost", "Stolen"],
    aliases: &[],
};

const fn col(name: &'static str, kind: FieldKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        required: false,
        nullable: true,
    }
}

const fn req(name: &'static str, kind: FieldKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        required: true,
        nullable: false,
    }
}

/// Optional on insert, where storage supplies the default.
const fn defaulted(name: &'static str, kind: FieldKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        required: false,
        nullable: false,
    }
}

use FieldKind::{Bool, Date, Decimal, Integer, Reference, Text, Timestamp};

static PERSONAL_INFO: EntitySchema = EntitySchema {
    name: "personal_info",
    label: "Personal Info",
    columns: &[
        req("name", Text),
        col("father_name", Text),
        col("mother_name", Text),
        col("email", Text),
        col("phone", Text),
        col("aadhar", Text),
        col("gender", Text),
        col("blood_group", Text),
        col("date_of_birth", Date),
        col("designation", Text),
        col("current_address", Text),
        col("permanent_address", Text),
        col("is_self", Bool),
    ],
};

static FAMILY_MEMBERS: EntitySchema = EntitySchema {
    name: "family_members",
    label: "Family Members",
    columns: &[
        req("name", Text),
        req("relationship", Text),
        col("gender", Text),
        col("date_of_birth", Date),
        col("phone", Text),
        col("email", Text),
        col("occupation", Text),
        col("address", Text),
        col("father_id", Reference),
        col("mother_id", Reference),
        col("is_alive", Bool),
    ],
};

static SHAREHOLDINGS: EntitySchema = EntitySchema {
    name: "shareholdings",
    label: "Shareholdings",
    columns: &[
        col("family_member_id", Reference),
        req("holder_name", Text),
        col("company_name", Text),
        col("entity_type", Text),
        col("share_holding_certificate_status", Text),
        col("loan_amount", Decimal),
        col("shareholding_percent", Decimal),
        col("equity_shares", Integer),
        col("current_value", Decimal),
        col("remarks", Text),
        col("filter_name", Text),
    ],
};

static PROPERTIES: EntitySchema = EntitySchema {
    name: "properties",
    label: "Properties",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        col("owner_user", Text),
        col("property_holder_name", Text),
        col("property_type", Text),
        col("property_address", Text),
        col("state", Text),
        col("total_area", Decimal),
        col("rooms_count", Integer),
        col("property_value", Decimal),
        col("registration_fees", Decimal),
        col("payment_type", Text),
        col("amount", Decimal),
        col("loan_on_property", Bool),
        col("loan_from_bank", Text),
        col("loan_amount", Decimal),
        col("loan_tenure_years", Integer),
        col("total_emi", Decimal),
        col("emi_amount", Decimal),
        col("total_emi_payment", Decimal),
        col("loan_start_date", Date),
        col("loan_end_date", Date),
        col("loan_status", Text),
        col("income_from_property", Decimal),
        col("tenant_name", Text),
        col("rent_agreement_start_date", Date),
        col("rent_agreement_end_date", Date),
        col("monthly_rent", Decimal),
        col("monthly_maintenance", Decimal),
        col("total_income", Decimal),
        col("registration_status", Text),
        col("mutation", Text),
        col("remark", Text),
        col("other_documents", Text),
    ],
};

static ASSETS: EntitySchema = EntitySchema {
    name: "assets",
    label: "Assets",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        col("owner_user", Text),
        col("asset_type", Text),
        col("asset_category", Text),
        col("model", Text),
        col("brand", Text),
        col("purchase_date", Date),
        col("purchase_price", Decimal),
        col("current_value", Decimal),
        col("condition", Text),
        col("location", Text),
        col("serial_no", Text),
        col("has_insurance", Bool),
        col("insurance_provider", Text),
        col("insurance_expiry_date", Date),
        col("has_warranty", Bool),
        col("warranty_expiry_date", Date),
        col("remarks", Text),
        col("other_documents", Text),
    ],
};

static BANKING_DETAILS: EntitySchema = EntitySchema {
    name: "banking_details",
    label: "Banking Details",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        col("account_holder", Text),
        col("bank_name", Text),
        col("account_type", Text),
        col("account_number", Text),
        col("ifsc_code", Text),
        col("user_id_bank", Text),
        col("password", Text),
        col("branch", Text),
        col("branch_code", Text),
        col("contact_no", Text),
        col("mail_id", Text),
        col("card_type", Text),
        col("card_no", Text),
        col("card_expiry", Text),
    ],
};

static STOCKS: EntitySchema = EntitySchema {
    name: "stocks",
    label: "Stocks",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        col("stock_name", Text),
        col("investment_type", Text),
        col("entity_name", Text),
        col("value", Decimal),
        col("at_price", Decimal),
        col("status", Text),
        col("profit_loss", Decimal),
        col("filter_name", Text),
    ],
};

static POLICIES: EntitySchema = EntitySchema {
    name: "policies",
    label: "Policies",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        col("insured_person_name", Text),
        col("service_provider", Text),
        col("policy_name", Text),
        col("insurance_type", Text),
        col("login_id", Text),
        col("password", Text),
        col("policy_number", Text),
        col("nominees", Text),
        col("relation_with_nominees", Text),
        col("nominees_share_percent", Decimal),
        col("premium_mode", Text),
        col("policy_start_date", Date),
        col("policy_last_payment_date", Date),
        col("date_of_maturity", Date),
        col("policy_status", Text),
        col("maturity_status", Text),
        col("premium_paying_term", Integer),
        col("premium_amount", Decimal),
        col("total_premium_amount", Decimal),
        col("death_sum_assured", Decimal),
        col("sum_insured", Decimal),
        col("bonus_or_additional", Decimal),
        col("other_documents", Text),
        col("notes", Text),
    ],
};

static LOANS: EntitySchema = EntitySchema {
    name: "loans",
    label: "Loans",
    columns: &[
        col("family_member_id", Reference),
        req("name", Text),
        req("borrower_name", Text),
        req("lender_name", Text),
        col("loan_type", Text),
        req("loan_amount", Decimal),
        col("interest_rate", Decimal),
        col("loan_term_years", Integer),
        col("loan_term_months", Integer),
        col("emi_amount", Decimal),
        req("loan_start_date", Date),
        col("loan_end_date", Date),
        col("next_payment_date", Date),
        req("loan_status", FieldKind::Choice(&LOAN_STATUS)),
        col("collateral", Text),
        col("purpose", Text),
        col("guarantor", Text),
        col("account_number", Text),
        col("bank_branch", Text),
        col("contact_person", Text),
        col("contact_number", Text),
        col("email", Text),
        col("notes", Text),
    ],
};

static INCOME_SHEET: EntitySchema = EntitySchema {
    name: "income_sheet",
    label: "Income Sheet",
    columns: &[
        col("family_member_id", Reference),
        req("entry_date", Date),
        req("narration", Text),
        req("amount", Decimal),
        req("transaction_type", FieldKind::Choice(&TRANSACTION_TYPE)),
        col("category", Text),
        col("notes", Text),
    ],
};

static BUSINESS_INFO: EntitySchema = EntitySchema {
    name: "business_info",
    label: "Business Info",
    columns: &[
        col("family_member_id", Reference),
        req("business_name", Text),
        col("business_type", Text),
        col("registration_number", Text),
        col("gst_number", Text),
        col("pan_number", Text),
        col("owner_name", Text),
        col("business_address", Text),
        col("contact_number", Text),
        col("email", Text),
        col("website", Text),
        col("established_date", Date),
        col("industry", Text),
        col("annual_revenue", Decimal),
        col("employee_count", Integer),
        col("bank_account", Text),
        col("ifsc_code", Text),
        col("license_numbers", Text),
        col("tax_registration_details", Text),
        col("business_description", Text),
    ],
};

static CARDS: EntitySchema = EntitySchema {
    name: "cards",
    label: "Cards",
    columns: &[
        col("family_member_id", Reference),
        col("card_type", FieldKind::Choice(&CARD_TYPE)),
        col("card_network", FieldKind::Choice(&CARD_NETWORK)),
        col("bank_name", Text),
        col("card_holder_name", Text),
        req("card_number", Text),
        req("expiry_date", Date),
        col("cvv", Text),
        col("status", FieldKind::Choice(&CARD_STATUS)),
        col("daily_limit", Decimal),
        col("bill_generation_date", Integer),
        col("payment_due_date", Integer),
        col("notes", Text),
    ],
};

static REMINDERS: EntitySchema = EntitySchema {
    name: "reminders",
    label: "Reminders",
    columns: &[
        req("title", Text),
        col("description", Text),
        col("reminder_date", Timestamp),
        col("reminder_type", Text),
        defaulted("priority", FieldKind::Choice(&PRIORITY)),
        defaulted("status", FieldKind::Choice(&REMINDER_STATUS)),
        col("related_table", Text),
        col("related_record_id", Integer),
        defaulted("notification_sent", Bool),
        col("repeat_type", FieldKind::Choice(&REPEAT_TYPE)),
        col("repeat_interval", Integer),
    ],
};

/// Registration order; also the order used by stats and export.
static ALL: [&EntitySchema; 13] = [
    &PERSONAL_INFO,
    &FAMILY_MEMBERS,
    &SHAREHOLDINGS,
    &PROPERTIES,
    &ASSETS,
    &BANKING_DETAILS,
    &STOCKS,
    &POLICIES,
    &LOANS,
    &INCOME_SHEET,
    &BUSINESS_INFO,
    &CARDS,
    &REMINDERS,
];

static REGISTRY: Lazy<HashMap<&'static str, &'static EntitySchema>> =
    Lazy::new(|| ALL.iter().map(|schema| (schema.name, *schema)).collect());

pub fn get_schema(entity_type: &str) -> AppResult<&'static EntitySchema> {
    REGISTRY
        .get(entity_type)
        .copied()
        .ok_or_else(|| AppError::invalid_entity_type(entity_type))
}

pub fn is_valid_entity_type(entity_type: &str) -> bool {
    REGISTRY.contains_key(entity_type)
}

pub fn entity_types() -> impl Iterator<Item = &'static EntitySchema> {
    ALL.iter().copied()
}

/// Whether a value counts as supplied for a required field.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

impl EntitySchema {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter(|column| column.required)
            .map(|column| column.name)
    }

    pub fn nameable_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|column| column.name)
            .filter(|name| NAMEABLE.contains(name))
            .collect()
    }

    pub fn references_family_members(&self) -> bool {
        self.column("family_member_id")
            .is_some_and(|column| column.kind == FieldKind::Reference)
    }
}

fn blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

impl ColumnDef {
    /// Normalises a payload value into the shape stored for this column.
    ///
    /// `null` and blank strings become `null` for every non-text kind.
    pub fn coerce(&self, value: &Value) -> AppResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(AppError::invalid_field(self.name, "expected a scalar value"));
        }
        if self.kind != FieldKind::Text && blank(value) {
            return Ok(Value::Null);
        }
        match self.kind {
            FieldKind::Text => Ok(match value {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }),
            FieldKind::Integer | FieldKind::Reference => {
                let parsed = match value {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                match parsed {
                    Some(id) if self.kind == FieldKind::Reference && id <= 0 => {
                        Err(AppError::invalid_field(self.name, "expected a positive id"))
                    }
                    Some(n) => Ok(Value::from(n)),
                    None => Err(AppError::invalid_field(self.name, "expected an integer")),
                }
            }
            FieldKind::Decimal => {
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .filter(|f| f.is_finite())
                    .map(Value::from)
                    .ok_or_else(|| AppError::invalid_field(self.name, "expected a number"))
            }
            FieldKind::Bool => {
                let parsed = match value {
                    Value::Bool(b) => Some(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(0) => Some(false),
                        Some(1) => Some(true),
                        _ => None,
                    },
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" | "1" | "yes" => Some(true),
                        "false" | "0" | "no" => Some(false),
                        _ => None,
                    },
                    _ => None,
                };
                parsed
                    .map(Value::Bool)
                    .ok_or_else(|| AppError::invalid_field(self.name, "expected a boolean"))
            }
            FieldKind::Date => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| AppError::invalid_field(self.name, "expected a date"))?;
                // Accept a full timestamp and keep its calendar date.
                let head = raw.trim().get(..10).unwrap_or(raw);
                parse_date(head)
                    .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| AppError::invalid_field(self.name, "expected YYYY-MM-DD"))
            }
            FieldKind::Timestamp => parse_instant_ms(value)
                .map(Value::from)
                .ok_or_else(|| AppError::invalid_field(self.name, "expected a timestamp")),
            FieldKind::Choice(set) => value
                .as_str()
                .and_then(|raw| set.canonical(raw))
                .map(|canonical| Value::String(canonical.to_string()))
                .ok_or_else(|| {
                    AppError::invalid_field(
                        self.name,
                        format!("expected one of {}", set.values.join(", ")),
                    )
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_rejects_unknown_types() {
        assert!(is_valid_entity_type("properties"));
        assert!(!is_valid_entity_type("users"));
        let err = get_schema("users; DROP TABLE users").expect_err("unregistered");
        assert_eq!(err.code(), AppError::INVALID_ENTITY_TYPE);
    }

    #[test]
    fn every_registered_schema_has_a_required_field() {
        for schema in entity_types() {
            assert!(
                schema.required_fields().next().is_some(),
                "{} has no required field",
                schema.name
            );
            for column in schema.columns {
                assert!(!is_read_only(column.name), "{}", column.name);
            }
        }
    }

    #[test]
    fn nameable_columns_follow_schema() {
        let shareholdings = get_schema("shareholdings").unwrap();
        assert_eq!(
            shareholdings.nameable_columns(),
            vec!["holder_name", "company_name"]
        );
        assert!(get_schema("cards").unwrap().nameable_columns().is_empty());
        assert_eq!(get_schema("reminders").unwrap().nameable_columns(), vec!["title"]);
    }

    #[test]
    fn loans_require_the_six_core_fields() {
        let loans = get_schema("loans").unwrap();
        let required: Vec<_> = loans.required_fields().collect();
        assert_eq!(
            required,
            vec![
                "name",
                "borrower_name",
                "lender_name",
                "loan_amount",
                "loan_start_date",
                "loan_status"
            ]
        );
    }

    #[test]
    fn legacy_pending_status_is_active() {
        let reminders = get_schema("reminders").unwrap();
        let status = reminders.column("status").unwrap();
        assert_eq!(status.coerce(&json!("pending")).unwrap(), json!("Active"));
        assert_eq!(status.coerce(&json!("COMPLETED")).unwrap(), json!("Completed"));
        let err = status.coerce(&json!("snoozed")).unwrap_err();
        assert_eq!(err.context().get("field").map(String::as_str), Some("status"));
    }

    #[test]
    fn coercion_normalises_by_kind() {
        let properties = get_schema("properties").unwrap();
        let value = properties.column("property_value").unwrap();
        assert_eq!(value.coerce(&json!("5000000")).unwrap().as_f64(), Some(5_000_000.0));
        assert_eq!(value.coerce(&json!("")).unwrap(), Value::Null);
        assert!(value.coerce(&json!("lots")).is_err());

        let rooms = properties.column("rooms_count").unwrap();
        assert_eq!(rooms.coerce(&json!(3.0)).unwrap(), json!(3));
        assert!(rooms.coerce(&json!(3.5)).is_err());

        let flag = properties.column("loan_on_property").unwrap();
        assert_eq!(flag.coerce(&json!("true")).unwrap(), json!(true));
        assert_eq!(flag.coerce(&json!(0)).unwrap(), json!(false));

        let date = properties.column("loan_start_date").unwrap();
        assert_eq!(
            date.coerce(&json!("2024-03-01T00:00:00.000Z")).unwrap(),
            json!("2024-03-01")
        );
        assert!(date.coerce(&json!("2024-13-01")).is_err());

        let member = properties.column("family_member_id").unwrap();
        assert!(member.coerce(&json!(-4)).is_err());
        assert!(member.coerce(&json!({"id": 1})).is_err());
    }

    #[test]
    fn presence_ignores_blank_strings_only() {
        assert!(!is_present(&Value::Null));
        assert!(!is_present(&json!("   ")));
        assert!(is_present(&json!(0)));
        assert!(is_present(&json!(false)));
        assert!(is_present(&json!("x")));
    }
}
