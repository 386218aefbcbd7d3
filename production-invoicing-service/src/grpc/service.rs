//! ProductionInvoicingService gRPC implementation.

use prometheus::HistogramTimer;
use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use tonic::{Code, Request, Response, Status};
use tracing::{info, instrument, Span};
use uuid::Uuid;

use super::convert::{
    invoice_status_from_proto, invoice_to_proto, invoice_type_from_proto, line_item_to_proto,
    optional_string, parse_amount, parse_optional_date, parse_optional_uuid, parse_uuid,
    payment_method_from_proto, payment_to_proto,
};
use crate::grpc::proto::{
    production_invoicing_service_server::ProductionInvoicingService, CancelInvoiceRequest,
    CancelInvoiceResponse, CreateInvoiceForOrderRequest, CreateInvoiceForOrderResponse,
    GetInvoiceRequest, GetInvoiceResponse, GetPaymentHistoryRequest, GetPaymentHistoryResponse,
    ListInvoicesByProductionOrderRequest, ListInvoicesByProductionOrderResponse,
    ListInvoicesRequest, ListInvoicesResponse, ListOutstandingInvoicesRequest,
    ListOutstandingInvoicesResponse, RecordPaymentRequest, RecordPaymentResponse,
    UpdateInvoiceRequest, UpdateInvoiceResponse,
};
use crate::models::{InvoiceUpdate, ListInvoicesFilter, OutstandingInvoicesFilter, RecordPayment};
use crate::services::metrics::{ERRORS_TOTAL, GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::InvoiceService;

/// Count the error kind, then map it to a gRPC status.
fn reject(err: AppError) -> Status {
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
    err.into_status()
}

fn status_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::InvalidArgument => "invalid_argument",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        _ => "error",
    }
}

/// Record request count and latency for `method` and wrap the reply.
fn finish<T>(
    method: &str,
    timer: HistogramTimer,
    result: Result<T, Status>,
) -> Result<Response<T>, Status> {
    let label = match &result {
        Ok(_) => status_label(Code::Ok),
        Err(status) => status_label(status.code()),
    };
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, label])
        .inc();
    timer.observe_duration();
    result.map(Response::new)
}

/// ProductionInvoicingService implementation.
pub struct ProductionInvoicingServiceImpl {
    invoices: InvoiceService,
}

impl ProductionInvoicingServiceImpl {
    pub fn new(invoices: InvoiceService) -> Self {
        Self { invoices }
    }

    async fn list_invoices_inner(
        &self,
        req: ListInvoicesRequest,
    ) -> Result<ListInvoicesResponse, Status> {
        let (limit, offset) = ListInvoicesFilter::page(req.limit as i64, req.offset as i64);
        let filter = ListInvoicesFilter {
            status: invoice_status_from_proto(req.status)?,
            invoice_type: invoice_type_from_proto(req.invoice_type)?,
            production_order_id: parse_optional_uuid(
                "production_order_id",
                &req.production_order_id,
            )?,
            project_id: parse_optional_uuid("project_id", &req.project_id)?,
            limit,
            offset,
        };

        let page = self.invoices.list(&filter).await.map_err(reject)?;

        Ok(ListInvoicesResponse {
            has_more: page.has_more(offset),
            total: page.total,
            invoices: page.invoices.iter().map(invoice_to_proto).collect(),
        })
    }

    async fn get_invoice_inner(&self, req: GetInvoiceRequest) -> Result<GetInvoiceResponse, Status> {
        let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
        Span::current().record("invoice_id", invoice_id.to_string());

        let detail = self.invoices.get(invoice_id).await.map_err(reject)?;

        Ok(GetInvoiceResponse {
            invoice: Some(invoice_to_proto(&detail.invoice)),
            line_items: detail.line_items.iter().map(line_item_to_proto).collect(),
            payments: detail.payments.iter().map(payment_to_proto).collect(),
        })
    }

    async fn list_by_production_order_inner(
        &self,
        req: ListInvoicesByProductionOrderRequest,
    ) -> Result<ListInvoicesByProductionOrderResponse, Status> {
        let production_order_id = parse_uuid("production_order_id", &req.production_order_id)?;

        let invoices = self
            .invoices
            .list_for_production_order(production_order_id)
            .await
            .map_err(reject)?;

        Ok(ListInvoicesByProductionOrderResponse {
            invoices: invoices.iter().map(invoice_to_proto).collect(),
        })
    }

    async fn record_payment_inner(
        &self,
        req: RecordPaymentRequest,
    ) -> Result<RecordPaymentResponse, Status> {
        let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
        Span::current().record("invoice_id", invoice_id.to_string());

        let input = RecordPayment {
            invoice_id,
            amount: parse_amount(&req.amount)?,
            payment_method: payment_method_from_proto(req.payment_method)?,
            transaction_id: optional_string(req.transaction_id),
            notes: optional_string(req.notes),
            created_by: optional_string(req.created_by),
        };

        let recorded = self.invoices.record_payment(&input).await.map_err(reject)?;

        Span::current().record("payment_number", recorded.payment.payment_number.as_str());
        info!(
            invoice_number = %recorded.invoice.invoice_number,
            status = %recorded.invoice.status,
            units_created = recorded.units_created,
            "Payment recorded"
        );

        Ok(RecordPaymentResponse {
            payment: Some(payment_to_proto(&recorded.payment)),
            invoice: Some(invoice_to_proto(&recorded.invoice)),
            ordered_items_created: i32::try_from(recorded.units_created).unwrap_or(i32::MAX),
            message: recorded.message,
        })
    }

    async fn update_invoice_inner(
        &self,
        req: UpdateInvoiceRequest,
    ) -> Result<UpdateInvoiceResponse, Status> {
        let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
        Span::current().record("invoice_id", invoice_id.to_string());

        let update = InvoiceUpdate {
            status: invoice_status_from_proto(req.status)?,
            due_date: parse_optional_date("due_date", &req.due_date)?,
            payment_terms: optional_string(req.payment_terms),
            notes: optional_string(req.notes),
        };

        let invoice = self
            .invoices
            .update(invoice_id, &update)
            .await
            .map_err(reject)?;

        Ok(UpdateInvoiceResponse {
            invoice: Some(invoice_to_proto(&invoice)),
        })
    }

    async fn cancel_invoice_inner(
        &self,
        req: CancelInvoiceRequest,
    ) -> Result<CancelInvoiceResponse, Status> {
        let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
        Span::current().record("invoice_id", invoice_id.to_string());

        let invoice = self.invoices.cancel(invoice_id).await.map_err(reject)?;

        Ok(CancelInvoiceResponse {
            invoice: Some(invoice_to_proto(&invoice)),
        })
    }

    async fn payment_history_inner(
        &self,
        req: GetPaymentHistoryRequest,
    ) -> Result<GetPaymentHistoryResponse, Status> {
        let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;

        let payments = self
            .invoices
            .payment_history(invoice_id)
            .await
            .map_err(reject)?;

        Ok(GetPaymentHistoryResponse {
            payments: payments.iter().map(payment_to_proto).collect(),
        })
    }

    async fn outstanding_inner(
        &self,
        req: ListOutstandingInvoicesRequest,
    ) -> Result<ListOutstandingInvoicesResponse, Status> {
        let filter = OutstandingInvoicesFilter {
            project_id: parse_optional_uuid("project_id", &req.project_id)?,
            customer_id: parse_optional_uuid("customer_id", &req.customer_id)?,
        };

        let invoices = self.invoices.outstanding(&filter).await.map_err(reject)?;

        Ok(ListOutstandingInvoicesResponse {
            invoices: invoices.iter().map(invoice_to_proto).collect(),
        })
    }

    async fn create_for_order_inner(
        &self,
        req: CreateInvoiceForOrderRequest,
    ) -> Result<CreateInvoiceForOrderResponse, Status> {
        let order_id: Uuid = parse_uuid("order_id", &req.order_id)?;
        let invoice_type = invoice_type_from_proto(req.invoice_type)?.ok_or_else(|| {
            ERRORS_TOTAL.with_label_values(&["validation_error"]).inc();
            Status::invalid_argument("invoice_type is required")
        })?;

        let created = self
            .invoices
            .create_for_order(order_id, invoice_type, optional_string(req.created_by))
            .await
            .map_err(reject)?;

        Span::current().record("invoice_id", created.invoice.invoice_id.to_string());

        Ok(CreateInvoiceForOrderResponse {
            invoice: Some(invoice_to_proto(&created.invoice)),
            line_items: created.line_items.iter().map(line_item_to_proto).collect(),
            message: created.message,
        })
    }
}

#[tonic::async_trait]
impl ProductionInvoicingService for ProductionInvoicingServiceImpl {
    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "ListInvoices")
    )]
    async fn list_invoices(
        &self,
        request: Request<ListInvoicesRequest>,
    ) -> Result<Response<ListInvoicesResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ListInvoices"])
            .start_timer();
        let result = self.list_invoices_inner(request.into_inner()).await;
        finish("ListInvoices", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "GetInvoice", invoice_id)
    )]
    async fn get_invoice(
        &self,
        request: Request<GetInvoiceRequest>,
    ) -> Result<Response<GetInvoiceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["GetInvoice"])
            .start_timer();
        let result = self.get_invoice_inner(request.into_inner()).await;
        finish("GetInvoice", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(
            service = "production-invoicing-service",
            method = "ListInvoicesByProductionOrder"
        )
    )]
    async fn list_invoices_by_production_order(
        &self,
        request: Request<ListInvoicesByProductionOrderRequest>,
    ) -> Result<Response<ListInvoicesByProductionOrderResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ListInvoicesByProductionOrder"])
            .start_timer();
        let result = self
            .list_by_production_order_inner(request.into_inner())
            .await;
        finish("ListInvoicesByProductionOrder", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(
            service = "production-invoicing-service",
            method = "RecordPayment",
            invoice_id,
            payment_number
        )
    )]
    async fn record_payment(
        &self,
        request: Request<RecordPaymentRequest>,
    ) -> Result<Response<RecordPaymentResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["RecordPayment"])
            .start_timer();
        let result = self.record_payment_inner(request.into_inner()).await;
        finish("RecordPayment", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "UpdateInvoice", invoice_id)
    )]
    async fn update_invoice(
        &self,
        request: Request<UpdateInvoiceRequest>,
    ) -> Result<Response<UpdateInvoiceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["UpdateInvoice"])
            .start_timer();
        let result = self.update_invoice_inner(request.into_inner()).await;
        finish("UpdateInvoice", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "CancelInvoice", invoice_id)
    )]
    async fn cancel_invoice(
        &self,
        request: Request<CancelInvoiceRequest>,
    ) -> Result<Response<CancelInvoiceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["CancelInvoice"])
            .start_timer();
        let result = self.cancel_invoice_inner(request.into_inner()).await;
        finish("CancelInvoice", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "GetPaymentHistory")
    )]
    async fn get_payment_history(
        &self,
        request: Request<GetPaymentHistoryRequest>,
    ) -> Result<Response<GetPaymentHistoryResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["GetPaymentHistory"])
            .start_timer();
        let result = self.payment_history_inner(request.into_inner()).await;
        finish("GetPaymentHistory", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "production-invoicing-service", method = "ListOutstandingInvoices")
    )]
    async fn list_outstanding_invoices(
        &self,
        request: Request<ListOutstandingInvoicesRequest>,
    ) -> Result<Response<ListOutstandingInvoicesResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ListOutstandingInvoices"])
            .start_timer();
        let result = self.outstanding_inner(request.into_inner()).await;
        finish("ListOutstandingInvoices", timer, result)
    }

    #[instrument(
        skip(self, request),
        fields(
            service = "production-invoicing-service",
            method = "CreateInvoiceForOrder",
            invoice_id
        )
    )]
    async fn create_invoice_for_order(
        &self,
        request: Request<CreateInvoiceForOrderRequest>,
    ) -> Result<Response<CreateInvoiceForOrderResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["CreateInvoiceForOrder"])
            .start_timer();
        let result = self.create_for_order_inner(request.into_inner()).await;
        finish("CreateInvoiceForOrder", timer, result)
    }
}
