//! Per-kind Stripe list/retrieve calls, centralized here so every other
//! crate (`sse-backfill`'s registry wiring, `sse-upsert`'s parent backfill,
//! `sse-router`'s re-fetch policy) treats Stripe as a single typed source
//! rather than re-deriving `async-stripe` call shapes in three places.
//!
//! Every syncable kind funnels through [`list`] and [`retrieve`], dispatching
//! on the registry's object-name string. New kinds are added here once.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use stripe::Client;

use crate::retry::{with_retries, RetryPolicy};

#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub created_gte: Option<i64>,
    pub starting_after: Option<String>,
    pub limit: i64,
}

#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub has_more: bool,
}

fn to_values<T: serde::Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|o| serde_json::to_value(o).context("serialize stripe object to json"))
        .collect()
}

/// Lists one page for a registry-ordered object kind. Kinds without
/// `supports_created_filter` (payment_method, tax_id) ignore `created_gte`
/// here — the per-customer fan-out that supplies the customer scope for
/// those two kinds lives in `sse-backfill::controller`, which calls
/// [`list_payment_methods_for_customer`] / [`list_tax_ids_for_customer`]
/// directly rather than through this generic dispatcher.
///
/// Retries on rate limit/transient 5xx per `policy` (§7): on exhaustion the
/// error propagates so the caller marks the in-flight object run `error`.
macro_rules! simple_list {
    ($params_ty:ty, $stripe_ty:ty, $args:expr, $client:expr, $policy:expr) => {{
        let args: &ListArgs = $args;
        let params = <$params_ty>::new();
        let mut params = params;
        params.limit = Some(args.limit as u64);
        if let Some(gte) = args.created_gte {
            params.created = Some(stripe::RangeQuery::gte(gte));
        }
        if let Some(sa) = &args.starting_after {
            params.starting_after = Some(sa.parse().context("parse starting_after id")?);
        }
        let page = with_retries(*$policy, || <$stripe_ty>::list($client, &params))
            .await
            .with_context(|| format!("stripe list {}", stringify!($stripe_ty)))?;
        ListPage { items: to_values(&page.data)?, has_more: page.has_more }
    }};
}

pub async fn list(client: &Client, kind: &str, args: ListArgs, policy: &RetryPolicy) -> Result<ListPage> {
    let page = match kind {
        "product" => simple_list!(stripe::ListProducts, stripe::Product, &args, client, policy),
        "price" => simple_list!(stripe::ListPrices, stripe::Price, &args, client, policy),
        "plan" => simple_list!(stripe::ListPlans, stripe::Plan, &args, client, policy),
        "customer" => simple_list!(stripe::ListCustomers, stripe::Customer, &args, client, policy),
        "subscription" => simple_list!(stripe::ListSubscriptions, stripe::Subscription, &args, client, policy),
        "subscription_schedules" => {
            simple_list!(stripe::ListSubscriptionSchedules, stripe::SubscriptionSchedule, &args, client, policy)
        }
        "invoice" => simple_list!(stripe::ListInvoices, stripe::Invoice, &args, client, policy),
        "charge" => simple_list!(stripe::ListCharges, stripe::Charge, &args, client, policy),
        "setup_intent" => simple_list!(stripe::ListSetupIntents, stripe::SetupIntent, &args, client, policy),
        "payment_intent" => simple_list!(stripe::ListPaymentIntents, stripe::PaymentIntent, &args, client, policy),
        "credit_note" => simple_list!(stripe::ListCreditNotes, stripe::CreditNote, &args, client, policy),
        "dispute" => simple_list!(stripe::ListDisputes, stripe::Dispute, &args, client, policy),
        "refund" => simple_list!(stripe::ListRefunds, stripe::Refund, &args, client, policy),
        "checkout_sessions" => {
            simple_list!(stripe::ListCheckoutSessions, stripe::CheckoutSession, &args, client, policy)
        }
        "early_fraud_warning" => {
            simple_list!(stripe::ListEarlyFraudWarnings, stripe::EarlyFraudWarning, &args, client, policy)
        }
        other => bail!("sse-stripe::objects::list: unsupported kind {other:?}"),
    };
    Ok(page)
}

/// Payment methods require a customer id — Stripe has no platform-wide list.
/// Called once per mirrored customer by the backfill controller's
/// `payment_method` special case.
pub async fn list_payment_methods_for_customer(
    client: &Client,
    customer_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let customer: stripe::CustomerId = customer_id.parse().context("parse customer id")?;
    let mut params = stripe::ListPaymentMethods::new(customer);
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::PaymentMethod::list(client, &params)
        .await
        .context("stripe list payment methods for customer")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

/// Tax ids are likewise scoped to a customer.
pub async fn list_tax_ids_for_customer(
    client: &Client,
    customer_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let customer: stripe::CustomerId = customer_id.parse().context("parse customer id")?;
    let mut params = stripe::ListTaxIds::new(customer);
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::TaxId::list(client, &params)
        .await
        .context("stripe list tax ids for customer")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

/// Truncated-sub-list expansion (§4.E list expansion). Each of these four
/// sub-resources is paginated via its own nested or filtered endpoint rather
/// than the parent object's `expand` param, which does not paginate past the
/// first page.
pub async fn list_invoice_line_items(
    client: &Client,
    invoice_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let id: stripe::InvoiceId = invoice_id.parse().context("parse invoice id")?;
    let mut params = stripe::ListInvoiceLines::new();
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::Invoice::lines(client, &id, &params)
        .await
        .context("stripe list invoice line items")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

pub async fn list_credit_note_lines(
    client: &Client,
    credit_note_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let id: stripe::CreditNoteId = credit_note_id.parse().context("parse credit note id")?;
    let mut params = stripe::ListCreditNoteLines::new();
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::CreditNote::lines(client, &id, &params)
        .await
        .context("stripe list credit note lines")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

/// Charge refunds: the top-level refund list filtered by `charge`, not a
/// nested endpoint.
pub async fn list_refunds_for_charge(
    client: &Client,
    charge_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let charge: stripe::ChargeId = charge_id.parse().context("parse charge id")?;
    let mut params = stripe::ListRefunds::new();
    params.charge = Some(charge);
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::Refund::list(client, &params)
        .await
        .context("stripe list refunds for charge")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

/// Subscription items: the top-level subscription-item list filtered by
/// `subscription`.
pub async fn list_subscription_items_for_subscription(
    client: &Client,
    subscription_id: &str,
    starting_after: Option<String>,
    limit: i64,
) -> Result<ListPage> {
    let subscription: stripe::SubscriptionId = subscription_id.parse().context("parse subscription id")?;
    let mut params = stripe::ListSubscriptionItems::new(subscription);
    params.limit = Some(limit as u64);
    if let Some(sa) = &starting_after {
        params.starting_after = Some(sa.parse().context("parse starting_after id")?);
    }
    let page = stripe::SubscriptionItem::list(client, &params)
        .await
        .context("stripe list subscription items for subscription")?;
    Ok(ListPage { items: to_values(&page.data)?, has_more: page.has_more })
}

/// Retrieves a single object by kind + id — used by parent-backfill
/// (`sse-upsert`) and the re-fetch policy (`sse-router`). Only the kinds that
/// are ever a parent-backfill target or a re-fetch-eligible kind are wired;
/// extend this match as new callers need new kinds.
///
/// Retries on rate limit/transient 5xx per `policy` (§7), same as [`list`].
pub async fn retrieve(client: &Client, kind: &str, id: &str, policy: &RetryPolicy) -> Result<Value> {
    let value = match kind {
        "customer" => {
            let id: stripe::CustomerId = id.parse().context("parse customer id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Customer::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve customer")?,
            )?
        }
        "invoice" => {
            let id: stripe::InvoiceId = id.parse().context("parse invoice id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Invoice::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve invoice")?,
            )?
        }
        "subscription" => {
            let id: stripe::SubscriptionId = id.parse().context("parse subscription id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Subscription::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve subscription")?,
            )?
        }
        "charge" => {
            let id: stripe::ChargeId = id.parse().context("parse charge id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Charge::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve charge")?,
            )?
        }
        "payment_intent" => {
            let id: stripe::PaymentIntentId = id.parse().context("parse payment intent id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::PaymentIntent::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve payment intent")?,
            )?
        }
        "checkout_sessions" => {
            let id: stripe::CheckoutSessionId = id.parse().context("parse checkout session id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::CheckoutSession::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve checkout session")?,
            )?
        }
        "product" => {
            let id: stripe::ProductId = id.parse().context("parse product id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Product::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve product")?,
            )?
        }
        "price" => {
            let id: stripe::PriceId = id.parse().context("parse price id")?;
            serde_json::to_value(
                with_retries(*policy, || stripe::Price::retrieve(client, &id, &[]))
                    .await
                    .context("retrieve price")?,
            )?
        }
        other => bail!("sse-stripe::objects::retrieve: unsupported kind {other:?}"),
    };
    Ok(value)
}
