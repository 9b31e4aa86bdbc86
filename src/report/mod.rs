//! Report engine: read-only views over the result store.
//!
//! Every page function is pure over the records it is given; [`route`] maps
//! a request target to the records it needs and the page to render. Records
//! compared against another baseline than the current one are left out of
//! every report except the latest and stale listings.

pub mod crash;
pub mod findings;
pub mod html;
pub mod library;
pub mod overview;
pub mod timing;

use log::{debug, error};

use crate::context::{ReportContext, ServerContext};
use crate::error::DacaResult;
use crate::storage::ResultRecord;

pub use html::{HttpResponse, Request};

use findings::{DiffAggregate, FindingSection};
use library::{LibraryReport, LIBRARY_NAMES_SHOWN};
use timing::TimingSummary;

/// Render the response for `target` (`/path?query`). Failures are logged and
/// answered with a 500; unknown paths fall back to files in the results
/// directory.
pub fn route(ctx: &ServerContext, target: &str) -> HttpResponse {
    let request = Request::parse(target);
    match render(ctx, &request) {
        Ok(response) => response,
        Err(e) => {
            error!("Report {} failed: {}", request.path, e);
            HttpResponse::internal_error()
        }
    }
}

fn current_results(ctx: &ServerContext, rc: &ReportContext) -> DacaResult<Vec<ResultRecord>> {
    let baseline = rc.baseline.clone();
    Ok(ctx
        .store
        .iter_results()?
        .filter(|r| r.is_current(&baseline))
        .collect())
}

fn current_info(ctx: &ServerContext, rc: &ReportContext) -> DacaResult<Vec<ResultRecord>> {
    let baseline = rc.baseline.clone();
    Ok(ctx
        .store
        .iter_info()?
        .filter(|r| r.is_current(&baseline))
        .collect())
}

fn overview_stats(ctx: &ServerContext) -> DacaResult<overview::OverviewStats> {
    use crate::context::ServerCounters;

    let store_stats = ctx.store.stats()?;
    let counters = &ctx.counters;
    Ok(overview::OverviewStats {
        baseline: ctx.versions.baseline.clone(),
        packages: ctx.catalog.get_count()?,
        cursor: ctx.catalog.cursor(),
        withdrawn: ctx.catalog.withdrawn_count(),
        results: store_stats.results,
        sidecars: store_stats.sidecars,
        info_records: store_stats.info_records,
        connections: ServerCounters::get(&counters.connections),
        uploads_accepted: ServerCounters::get(&counters.uploads_accepted),
        uploads_rejected: ServerCounters::get(&counters.uploads_rejected),
        protocol_errors: ServerCounters::get(&counters.protocol_errors),
        started_at: Some(ctx.started_at),
    })
}

fn render(ctx: &ServerContext, request: &Request) -> DacaResult<HttpResponse> {
    let rc = ctx.report_context();
    let today = rc.now.date();
    let path = request.path.as_str();
    debug!("Rendering {}", path);

    let response = match path {
        "/" | "/index.html" => HttpResponse::html(overview::overview_page(&overview_stats(ctx)?)),
        "/latest.html" => HttpResponse::html(overview::latest_page(&ctx.store.recent(), &rc)),
        "/crash.html" => {
            let records = current_results(ctx, &rc)?;
            if request.flag("pkgs") {
                HttpResponse::text(crash::crash_packages(&records))
            } else {
                HttpResponse::html(crash::crash_page(&records, &rc))
            }
        }
        "/timeout.html" => {
            HttpResponse::html(overview::timeout_page(current_results(ctx, &rc)?, &rc))
        }
        "/stale.html" => {
            let days = request
                .number::<i64>("days")
                .filter(|d| *d >= 0)
                .unwrap_or(rc.stale_days);
            HttpResponse::html(overview::stale_page(ctx.store.iter_results()?, &rc, days))
        }
        "/diff.html" => {
            let sidecars = ctx.store.sidecars()?;
            let aggregate = DiffAggregate::from_sidecars(sidecars.iter().map(|(_, s)| s), today);
            HttpResponse::html(findings::diff_page(&aggregate, &rc.baseline))
        }
        "/head.html" => {
            let counts = findings::count_ids(
                current_results(ctx, &rc)?,
                FindingSection::HeadResults,
                today,
            );
            HttpResponse::html(findings::head_page("HEAD report", &counts, "head-"))
        }
        "/headinfo.html" => {
            let counts = findings::count_ids(
                current_info(ctx, &rc)?,
                FindingSection::InfoMessages,
                today,
            );
            HttpResponse::html(findings::head_page(
                "HEAD (information) report",
                &counts,
                "headinfo-",
            ))
        }
        "/time_lt.html" | "/time_gt.html" => {
            let factor = timing::sanitize_factor(request.number("factor"));
            let summary = TimingSummary::collect(current_results(ctx, &rc)?);
            let regressed = path == "/time_gt.html";
            if regressed && request.flag("pkgs") {
                HttpResponse::text(timing::regressed_packages(&summary, factor))
            } else {
                HttpResponse::html(timing::time_page(&summary, regressed, factor, &rc.baseline))
            }
        }
        "/time_slow.html" => {
            let summary = TimingSummary::collect(current_results(ctx, &rc)?);
            HttpResponse::html(timing::slow_page(&summary, &rc.baseline))
        }
        _ => return render_prefixed(ctx, request, &rc),
    };
    Ok(response)
}

/// Drill-down pages whose path carries an argument, then static files.
fn render_prefixed(
    ctx: &ServerContext,
    request: &Request,
    rc: &ReportContext,
) -> DacaResult<HttpResponse> {
    let path = request.path.as_str();
    let today = rc.now.date();

    if let Some(kind) = LibraryReport::from_page(path) {
        let ranked = library::count_library_names(current_info(ctx, rc)?, kind, LIBRARY_NAMES_SHOWN);
        return Ok(HttpResponse::html(library::library_page(kind, &ranked)));
    }
    if let Some(name) = path.strip_prefix("/check_library-") {
        let name = html::decode_component(name);
        return Ok(HttpResponse::text(library::library_name_lines(
            current_info(ctx, rc)?,
            &name,
        )));
    }

    // "difftoday-" must be tried before "diff-"
    let drilldowns: [(&str, FindingSection, bool, bool); 4] = [
        ("/difftoday-", FindingSection::Diff, true, false),
        ("/diff-", FindingSection::Diff, false, false),
        ("/headinfo-", FindingSection::InfoMessages, false, true),
        ("/head-", FindingSection::HeadResults, false, false),
    ];
    for (prefix, section, today_only, info) in drilldowns {
        let Some(id) = path.strip_prefix(prefix) else {
            continue;
        };
        let id = html::decode_component(id);
        let records = if info {
            current_info(ctx, rc)?
        } else {
            current_results(ctx, rc)?
        };
        let today = today_only.then_some(today);
        return Ok(HttpResponse::text(findings::message_lines(
            records, section, &id, today,
        )));
    }

    serve_static(ctx, path)
}

/// Raw files under the results directory, served as text.
fn serve_static(ctx: &ServerContext, path: &str) -> DacaResult<HttpResponse> {
    let decoded = html::decode_component(path);
    let Some(file) = ctx.store.resolve_static(&decoded) else {
        return Ok(HttpResponse::not_found());
    };
    let bytes = std::fs::read(&file)?;
    Ok(HttpResponse::bytes("text/plain", bytes))
}
