//! Invoice creation tests for production-invoicing-service.

mod common;

use chrono::{Datelike, Days, Utc};
use common::{customer_id, dec, project_id, Fault, TestContext};
use production_invoicing_service::models::{
    InvoiceStatus, InvoiceType, PaymentMethod, ProductionOrderStatus, RecordPayment,
};
use production_invoicing_service::services::accounting::SyncJob;
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
async fn deposit_invoice_bills_half_of_every_production_order() {
    let mut ctx = TestContext::new();
    let order_id = Uuid::new_v4();
    // Seeded out of order; line numbering follows the order number.
    let second = ctx
        .repo
        .seed_production_order(order_id, "PO-2002", 3, "1000")
        .await;
    let first = ctx
        .repo
        .seed_production_order(order_id, "PO-2001", 2, "1000")
        .await;

    let created = ctx
        .service
        .create_for_order(order_id, InvoiceType::Deposit, Some("sales@millwork.test".to_string()))
        .await
        .expect("Failed to create invoice");
    let invoice = &created.invoice;
    let today = Utc::now().date_naive();

    assert_eq!(
        invoice.invoice_number,
        format!("INV-{}-0001", today.year())
    );
    assert_eq!(invoice.status, InvoiceStatus::PendingPayment);
    assert_eq!(invoice.production_order_id, first.production_order_id);
    assert_eq!(invoice.project_id, Some(project_id()));
    assert_eq!(invoice.customer_id, Some(customer_id()));
    assert_eq!(invoice.subtotal, dec("2500"));
    assert_eq!(invoice.shipping, dec("0"));
    assert_eq!(invoice.tax, dec("0"));
    assert_eq!(invoice.total, dec("2500"));
    assert_eq!(invoice.amount_paid, dec("0"));
    assert_eq!(invoice.amount_due, dec("2500"));
    assert_eq!(invoice.payment_terms, "Due on receipt");
    assert_eq!(invoice.due_date, Some(today));
    assert_eq!(invoice.created_by.as_deref(), Some("sales@millwork.test"));

    assert_eq!(created.line_items.len(), 2);
    let lines = &created.line_items;
    assert_eq!(lines[0].line_number, 1);
    assert_eq!(lines[0].production_order_id, first.production_order_id);
    assert_eq!(lines[0].production_order_number, "PO-2001");
    assert_eq!(lines[0].quantity, 2);
    assert_eq!(lines[0].unit_price, dec("500"));
    assert_eq!(lines[0].total, dec("1000"));
    assert!(lines[0].description.starts_with("Deposit (50%) - PO-2001"));
    assert_eq!(lines[1].line_number, 2);
    assert_eq!(lines[1].production_order_id, second.production_order_id);
    assert_eq!(lines[1].total, dec("1500"));

    assert!(created.message.contains(&invoice.invoice_number));
    assert_eq!(
        ctx.drain_sync_jobs(),
        vec![SyncJob::invoice(invoice.invoice_id)]
    );
}

#[tokio::test]
async fn final_invoice_adds_tiered_shipping_and_net_30_terms() {
    let ctx = TestContext::new();
    let order_id = Uuid::new_v4();
    ctx.repo
        .seed_production_order(order_id, "PO-3001", 1, "3000")
        .await;

    let created = ctx
        .service
        .create_for_order(order_id, InvoiceType::Final, None)
        .await
        .unwrap();
    let invoice = created.invoice;
    let today = Utc::now().date_naive();

    // 3000 total cost: 5% shipping tier.
    assert_eq!(invoice.subtotal, dec("1500"));
    assert_eq!(invoice.shipping, dec("150"));
    assert_eq!(invoice.total, dec("1650"));
    assert_eq!(invoice.payment_terms, "Net 30");
    assert_eq!(invoice.due_date, today.checked_add_days(Days::new(30)));
    assert!(created.line_items[0]
        .description
        .starts_with("Final payment (50%) - PO-3001"));
}

#[tokio::test]
async fn shipping_tiers_follow_the_combined_production_cost() {
    let cases = [
        ("12000", "0", "6000"),
        ("6000", "250", "3250"),
        ("500", "100", "350"),
    ];

    for (cost, shipping, total) in cases {
        let ctx = TestContext::new();
        let order_id = Uuid::new_v4();
        ctx.repo
            .seed_production_order(order_id, "PO-4001", 1, cost)
            .await;

        let invoice = ctx
            .service
            .create_for_order(order_id, InvoiceType::Final, None)
            .await
            .unwrap()
            .invoice;

        assert_eq!(invoice.shipping, dec(shipping), "cost {}", cost);
        assert_eq!(invoice.total, dec(total), "cost {}", cost);
    }
}

#[tokio::test]
async fn second_active_invoice_of_the_same_type_is_a_conflict() {
    let ctx = TestContext::new();
    let order = ctx.seed_single(2, "800").await;

    let first = ctx
        .service
        .create_for_order(order.order_id, InvoiceType::Deposit, None)
        .await
        .unwrap();
    let err = ctx
        .service
        .create_for_order(order.order_id, InvoiceType::Deposit, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // A final invoice for the same order is a different tranche.
    ctx.service
        .create_for_order(order.order_id, InvoiceType::Final, None)
        .await
        .expect("Final invoice should be allowed alongside the deposit");

    // Cancelling the deposit frees the slot.
    ctx.service.cancel(first.invoice.invoice_id).await.unwrap();
    let replacement = ctx
        .service
        .create_for_order(order.order_id, InvoiceType::Deposit, None)
        .await
        .unwrap();
    assert_ne!(replacement.invoice.invoice_number, first.invoice.invoice_number);
}

#[tokio::test]
async fn order_without_production_orders_is_not_found() {
    let ctx = TestContext::new();

    let err = ctx
        .service
        .create_for_order(Uuid::new_v4(), InvoiceType::Deposit, None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert!(ctx.repo.snapshot().await.invoices.is_empty());
}

#[tokio::test]
async fn failed_line_item_insert_leaves_no_invoice_behind() {
    let mut ctx = TestContext::new();
    let order = ctx.seed_single(1, "900").await;
    ctx.repo.fail("insert_line_items", Fault::Database);

    assert!(ctx
        .service
        .create_for_order(order.order_id, InvoiceType::Deposit, None)
        .await
        .is_err());

    let state = ctx.repo.snapshot().await;
    assert!(state.invoices.is_empty());
    assert!(state.line_items.is_empty());
    assert!(ctx.drain_sync_jobs().is_empty());
}

#[tokio::test]
async fn invoice_numbers_stay_unique_under_concurrent_creation() {
    let ctx = TestContext::new();
    let mut order_ids = Vec::new();
    for n in 0..8 {
        let order_id = Uuid::new_v4();
        ctx.repo
            .seed_production_order(order_id, &format!("PO-5{:03}", n), 1, "100")
            .await;
        order_ids.push(order_id);
    }

    let mut handles = Vec::new();
    for order_id in order_ids {
        let service = ctx.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .create_for_order(order_id, InvoiceType::Deposit, None)
                .await
        }));
    }
    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().invoice.invoice_number);
    }
    numbers.sort();

    let year = Utc::now().year();
    let expected: Vec<String> = (1..=8).map(|n| format!("INV-{}-{:04}", year, n)).collect();
    assert_eq!(numbers, expected);
}

#[tokio::test]
async fn paying_a_multi_order_deposit_settles_every_billed_order() {
    let ctx = TestContext::new();
    let order_id = Uuid::new_v4();
    let a = ctx
        .repo
        .seed_production_order(order_id, "PO-6001", 2, "1000")
        .await;
    let b = ctx
        .repo
        .seed_production_order(order_id, "PO-6002", 3, "1000")
        .await;

    let invoice = ctx
        .service
        .create_for_order(order_id, InvoiceType::Deposit, None)
        .await
        .unwrap()
        .invoice;
    let recorded = ctx
        .service
        .record_payment(&RecordPayment {
            invoice_id: invoice.invoice_id,
            amount: invoice.total,
            payment_method: PaymentMethod::Ach,
            transaction_id: None,
            notes: None,
            created_by: None,
        })
        .await
        .unwrap();

    assert_eq!(recorded.units_created, 5);
    assert!(recorded.message.contains("2 order(s)"));

    let state = ctx.repo.snapshot().await;
    for (order, quantity) in [(&a, 2), (&b, 3)] {
        let stored = state.production_order(order.production_order_id).unwrap();
        assert!(stored.deposit_paid);
        assert_eq!(stored.status, ProductionOrderStatus::InProgress);
        assert_eq!(state.units_for(order.production_order_id).len(), quantity);
    }
}
