//! Closed catalog of actions the reasoner may request.
//!
//! Every action carries its classification and its argument schema, so the
//! classifier is exhaustive by construction and arguments are validated
//! before any collaborator is touched.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::order::OrderId;
use crate::domain::product::{
    canonical_category, canonical_material, PriceSort, ProductId, ProductQuery, CATEGORIES,
    DEFAULT_SEARCH_LIMIT, MATERIALS, MAX_SEARCH_LIMIT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SearchProducts,
    FetchUserOrderInformation,
    LookupStorePolicy,
    ViewCart,
    AddToCart,
    UpdateCartItem,
    ClearCart,
    PlaceOrder,
    CancelOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// Read-only, dispatched without a human checkpoint.
    Safe,
    /// Mutating, dispatched only after explicit approval.
    Sensitive,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown action `{name}`")]
pub struct UnknownActionError {
    pub name: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionValidationError {
    #[error("missing required argument `{0}`")]
    Missing(&'static str),
    #[error("unexpected argument `{0}`")]
    Unexpected(String),
    #[error("argument `{name}` must be {expected}")]
    WrongType { name: &'static str, expected: &'static str },
    #[error("argument `{name}` is out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },
    #[error("argument `{name}` must be one of: {allowed}")]
    NotAllowed { name: &'static str, allowed: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    OneOf(&'static [&'static str]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec { name, kind, required, description }
}

const SEARCH_PRODUCTS_PARAMS: &[ParamSpec] = &[
    param(
        "query",
        ParamKind::String,
        false,
        "Free text matched against product names and descriptions.",
    ),
    param("category", ParamKind::OneOf(CATEGORIES), false, "Product category."),
    param("material", ParamKind::OneOf(MATERIALS), false, "Product material."),
    param("min_price", ParamKind::Number, false, "Minimum price in VND."),
    param("max_price", ParamKind::Number, false, "Maximum price in VND."),
    param(
        "min_stock",
        ParamKind::Integer,
        false,
        "Minimum stock quantity, 1 for in-stock items only.",
    ),
    param(
        "sort_by_price",
        ParamKind::OneOf(&["asc", "desc"]),
        false,
        "asc for cheapest first, desc for most expensive first.",
    ),
    param("limit", ParamKind::Integer, false, "Maximum number of results (default 20, max 50)."),
];

const LOOKUP_STORE_POLICY_PARAMS: &[ParamSpec] = &[param(
    "query",
    ParamKind::String,
    true,
    "Policy topic: shipping, returns, payment, warranty, order, wholesale or custom.",
)];

const CART_QUANTITY_PARAMS: &[ParamSpec] = &[
    param("product_id", ParamKind::Integer, true, "Product identifier."),
    param("quantity", ParamKind::Integer, true, "Number of items."),
];

const CANCEL_ORDER_PARAMS: &[ParamSpec] =
    &[param("order_id", ParamKind::Integer, true, "Identifier of the order to cancel.")];

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        Self::SearchProducts,
        Self::FetchUserOrderInformation,
        Self::LookupStorePolicy,
        Self::ViewCart,
        Self::AddToCart,
        Self::UpdateCartItem,
        Self::ClearCart,
        Self::PlaceOrder,
        Self::CancelOrder,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchProducts => "search_products",
            Self::FetchUserOrderInformation => "fetch_user_order_information",
            Self::LookupStorePolicy => "lookup_store_policy",
            Self::ViewCart => "view_cart",
            Self::AddToCart => "add_to_cart",
            Self::UpdateCartItem => "update_cart_item",
            Self::ClearCart => "clear_cart",
            Self::PlaceOrder => "place_order",
            Self::CancelOrder => "cancel_order",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn classification(&self) -> ActionClass {
        match self {
            Self::SearchProducts
            | Self::FetchUserOrderInformation
            | Self::LookupStorePolicy
            | Self::ViewCart => ActionClass::Safe,
            Self::AddToCart
            | Self::UpdateCartItem
            | Self::ClearCart
            | Self::PlaceOrder
            | Self::CancelOrder => ActionClass::Sensitive,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SearchProducts => {
                "Search handicraft products by text, category, material, price range and stock."
            }
            Self::FetchUserOrderInformation => {
                "Fetch the current customer's orders together with their items."
            }
            Self::LookupStorePolicy => {
                "Look up store policy text \
                 (shipping, returns, payment, warranty, order, wholesale, custom)."
            }
            Self::ViewCart => "Show the current cart contents and total.",
            Self::AddToCart => {
                "Add a quantity of a product to the cart. Fails if stock is insufficient."
            }
            Self::UpdateCartItem => "Set the quantity of a cart line. Quantity 0 removes the line.",
            Self::ClearCart => "Remove every line from the cart.",
            Self::PlaceOrder => {
                "Turn the cart into an order, decrement stock and empty the cart."
            }
            Self::CancelOrder => {
                "Cancel an order that has not been delivered and restock its items."
            }
        }
    }

    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            Self::SearchProducts => SEARCH_PRODUCTS_PARAMS,
            Self::LookupStorePolicy => LOOKUP_STORE_POLICY_PARAMS,
            Self::AddToCart | Self::UpdateCartItem => CART_QUANTITY_PARAMS,
            Self::CancelOrder => CANCEL_ORDER_PARAMS,
            Self::FetchUserOrderInformation
            | Self::ViewCart
            | Self::ClearCart
            | Self::PlaceOrder => &[],
        }
    }

    /// JSON schema of the arguments, in the shape function-calling APIs expect.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in self.params() {
            let mut property = match spec.kind {
                ParamKind::String => json!({ "type": "string" }),
                ParamKind::Integer => json!({ "type": "integer" }),
                ParamKind::Number => json!({ "type": "number" }),
                ParamKind::OneOf(allowed) => json!({ "type": "string", "enum": allowed }),
            };
            property["description"] = Value::String(spec.description.to_string());
            properties.insert(spec.name.to_string(), property);
            if spec.required {
                required.push(Value::String(spec.name.to_string()));
            }
        }

        json!({ "type": "object", "properties": properties, "required": required })
    }

    /// Checks `arguments` against the declared schema and produces a typed call.
    pub fn validate(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<ActionCall, ActionValidationError> {
        let args = Arguments::check(self.params(), arguments)?;

        let call = match self {
            Self::SearchProducts => ActionCall::SearchProducts(search_query(&args)?),
            Self::FetchUserOrderInformation => ActionCall::FetchUserOrderInformation,
            Self::LookupStorePolicy => ActionCall::LookupStorePolicy {
                query: args.string("query")?.unwrap_or_default(),
            },
            Self::ViewCart => ActionCall::ViewCart,
            Self::AddToCart => ActionCall::AddToCart {
                product_id: ProductId(args.required_integer("product_id")?),
                quantity: quantity(&args, 1)?,
            },
            Self::UpdateCartItem => ActionCall::UpdateCartItem {
                product_id: ProductId(args.required_integer("product_id")?),
                quantity: quantity(&args, 0)?,
            },
            Self::ClearCart => ActionCall::ClearCart,
            Self::PlaceOrder => ActionCall::PlaceOrder,
            Self::CancelOrder => {
                ActionCall::CancelOrder { order_id: OrderId(args.required_integer("order_id")?) }
            }
        };

        Ok(call)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves an action name to its classification.
pub fn classify(name: &str) -> Result<ActionClass, UnknownActionError> {
    ActionKind::parse(name)
        .map(|kind| kind.classification())
        .ok_or_else(|| UnknownActionError { name: name.to_string() })
}

/// A validated, strongly typed action ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionCall {
    SearchProducts(ProductQuery),
    FetchUserOrderInformation,
    LookupStorePolicy { query: String },
    ViewCart,
    AddToCart { product_id: ProductId, quantity: u32 },
    UpdateCartItem { product_id: ProductId, quantity: u32 },
    ClearCart,
    PlaceOrder,
    CancelOrder { order_id: OrderId },
}

impl ActionCall {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SearchProducts(_) => ActionKind::SearchProducts,
            Self::FetchUserOrderInformation => ActionKind::FetchUserOrderInformation,
            Self::LookupStorePolicy { .. } => ActionKind::LookupStorePolicy,
            Self::ViewCart => ActionKind::ViewCart,
            Self::AddToCart { .. } => ActionKind::AddToCart,
            Self::UpdateCartItem { .. } => ActionKind::UpdateCartItem,
            Self::ClearCart => ActionKind::ClearCart,
            Self::PlaceOrder => ActionKind::PlaceOrder,
            Self::CancelOrder { .. } => ActionKind::CancelOrder,
        }
    }
}

struct Arguments<'a> {
    values: BTreeMap<&'static str, &'a Value>,
}

impl<'a> Arguments<'a> {
    fn check(
        specs: &'static [ParamSpec],
        arguments: &'a Map<String, Value>,
    ) -> Result<Self, ActionValidationError> {
        let mut values = BTreeMap::new();

        for (name, value) in arguments {
            let spec = specs
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| ActionValidationError::Unexpected(name.clone()))?;
            if value.is_null() {
                continue;
            }
            check_kind(spec, value)?;
            values.insert(spec.name, value);
        }

        if let Some(missing) =
            specs.iter().find(|spec| spec.required && !values.contains_key(spec.name))
        {
            return Err(ActionValidationError::Missing(missing.name));
        }

        Ok(Self { values })
    }

    fn string(&self, name: &'static str) -> Result<Option<String>, ActionValidationError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(|text| Some(text.trim().to_string()))
                .ok_or(ActionValidationError::WrongType { name, expected: "a string" }),
        }
    }

    fn integer(&self, name: &'static str) -> Result<Option<i64>, ActionValidationError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(value) => as_integer(value)
                .map(Some)
                .ok_or(ActionValidationError::WrongType { name, expected: "an integer" }),
        }
    }

    fn required_integer(&self, name: &'static str) -> Result<i64, ActionValidationError> {
        self.integer(name)?.ok_or(ActionValidationError::Missing(name))
    }

    fn decimal(&self, name: &'static str) -> Result<Option<Decimal>, ActionValidationError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(value) => as_decimal(value)
                .map(Some)
                .ok_or(ActionValidationError::WrongType { name, expected: "a number" }),
        }
    }
}

fn check_kind(spec: &ParamSpec, value: &Value) -> Result<(), ActionValidationError> {
    let valid = match spec.kind {
        ParamKind::String => value.is_string(),
        ParamKind::Integer => as_integer(value).is_some(),
        ParamKind::Number => as_decimal(value).is_some(),
        ParamKind::OneOf(allowed) => {
            let Some(text) = value.as_str() else {
                return Err(ActionValidationError::WrongType {
                    name: spec.name,
                    expected: "a string",
                });
            };
            let text = text.trim().to_lowercase();
            if !allowed.iter().any(|candidate| candidate.to_lowercase() == text) {
                return Err(ActionValidationError::NotAllowed {
                    name: spec.name,
                    allowed: allowed.join(", "),
                });
            }
            true
        }
    };

    if valid {
        Ok(())
    } else {
        let expected = match spec.kind {
            ParamKind::Integer => "an integer",
            ParamKind::Number => "a number",
            ParamKind::String | ParamKind::OneOf(_) => "a string",
        };
        Err(ActionValidationError::WrongType { name: spec.name, expected })
    }
}

/// Accepts JSON integers, integral floats and numeric strings.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < 9.0e15)
                .map(|float| float as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => number.to_string().parse::<Decimal>().ok(),
        Value::String(text) => text.trim().parse::<Decimal>().ok(),
        _ => None,
    }
}

fn quantity(args: &Arguments<'_>, minimum: i64) -> Result<u32, ActionValidationError> {
    let value = args.required_integer("quantity")?;
    if value < minimum {
        return Err(ActionValidationError::OutOfRange {
            name: "quantity",
            reason: format!("must be at least {minimum}, got {value}"),
        });
    }
    u32::try_from(value).map_err(|_| ActionValidationError::OutOfRange {
        name: "quantity",
        reason: format!("{value} is too large"),
    })
}

fn search_query(args: &Arguments<'_>) -> Result<ProductQuery, ActionValidationError> {
    let category = match args.string("category")? {
        Some(value) => Some(canonical_category(&value).map(str::to_string).ok_or_else(|| {
            ActionValidationError::NotAllowed { name: "category", allowed: CATEGORIES.join(", ") }
        })?),
        None => None,
    };
    let material = match args.string("material")? {
        Some(value) => Some(canonical_material(&value).map(str::to_string).ok_or_else(|| {
            ActionValidationError::NotAllowed { name: "material", allowed: MATERIALS.join(", ") }
        })?),
        None => None,
    };
    let sort_by_price = match args.string("sort_by_price")?.map(|value| value.to_lowercase()) {
        None => None,
        Some(value) if value == "asc" => Some(PriceSort::Asc),
        Some(value) if value == "desc" => Some(PriceSort::Desc),
        Some(_) => {
            return Err(ActionValidationError::NotAllowed {
                name: "sort_by_price",
                allowed: "asc, desc".to_string(),
            })
        }
    };

    let min_price = args.decimal("min_price")?;
    let max_price = args.decimal("max_price")?;
    for (name, bound) in [("min_price", min_price), ("max_price", max_price)] {
        if bound.is_some_and(|price| price.is_sign_negative()) {
            return Err(ActionValidationError::OutOfRange {
                name,
                reason: "prices cannot be negative".to_string(),
            });
        }
    }
    if let (Some(min), Some(max)) = (min_price, max_price) {
        if min > max {
            return Err(ActionValidationError::OutOfRange {
                name: "min_price",
                reason: format!("{min} is greater than max_price {max}"),
            });
        }
    }

    let min_stock = match args.integer("min_stock")? {
        Some(value) => Some(u32::try_from(value).map_err(|_| ActionValidationError::OutOfRange {
            name: "min_stock",
            reason: format!("{value} is not a valid stock quantity"),
        })?),
        None => None,
    };

    let limit = match args.integer("limit")? {
        None => DEFAULT_SEARCH_LIMIT,
        Some(value) if (1..=i64::from(MAX_SEARCH_LIMIT)).contains(&value) => value as u32,
        Some(value) => {
            return Err(ActionValidationError::OutOfRange {
                name: "limit",
                reason: format!("must be between 1 and {MAX_SEARCH_LIMIT}, got {value}"),
            })
        }
    };

    Ok(ProductQuery {
        query: args.string("query")?.filter(|text| !text.is_empty()),
        category,
        material,
        min_price,
        max_price,
        min_stock,
        sort_by_price,
        limit,
    })
}
