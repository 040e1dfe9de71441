//! Selector-table scraping for ATS vendors that render listings as HTML.

use flightdeck_core::ats::AtsType;
use flightdeck_core::error::AppError;
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{Extracted, ListingPage};
use scraper::Html;

use super::{element_text, page_url, pilot_only, resolve_href, selector};

/// How one vendor lays out its job list.
struct VendorLayout {
    name: &'static str,
    /// Row containers, tried in order until one matches.
    rows: &'static [&'static str],
    title: &'static str,
    location: &'static str,
    /// Bare posting links, used when no row container matches.
    links: &'static str,
}

const TALEO: VendorLayout = VendorLayout {
    name: "taleo",
    rows: &[
        "div.multiline-data-container",
        "tr.job-row",
        "div.requisition",
        "table.jobs-list tbody tr",
    ],
    title: "span.titlelink a, a.job-title, a[href*='job']",
    location: "span.location, div.location, td:nth-child(2)",
    links: "a[href*='jobdetail']",
};

const SUCCESS_FACTORS: VendorLayout = VendorLayout {
    name: "successfactors",
    rows: &["tr.data-row", "li.job-tile", "tr.job-row"],
    title: "a.jobTitle-link, a[href*='jobDetail'], a[href*='/job/']",
    location: "span.jobLocation, td.colLocation, .location",
    links: "a[href*='jobDetail'], a[href*='requisition'], a[href*='/job/']",
};

const BRASSRING: VendorLayout = VendorLayout {
    name: "brassring",
    rows: &["li.job", "div.jobProperty", "tr.jobRow"],
    title: "a.jobtitle, a[href*='jobdetails'], a",
    location: ".location, span.position3",
    links: "a[href*='jobdetails']",
};

const ICIMS: VendorLayout = VendorLayout {
    name: "icims",
    rows: &["div.iCIMS_JobsTable div.row", "li.iCIMS_JobCardItem"],
    title: "a.iCIMS_Anchor, a[href*='/jobs/']",
    location: ".header.left span, .iCIMS_JobHeaderData, .location",
    links: "a[href*='/jobs/'][href*='/job']",
};

const AVATURE: VendorLayout = VendorLayout {
    name: "avature",
    rows: &["article.article--result", "li.list__item", "div.job-list-item"],
    title: "h3 a, a.link, a[href*='JobDetail']",
    location: ".list-item-location, .article__header__text__subtitle, .location",
    links: "a[href*='JobDetail']",
};

fn layout(ats_type: AtsType) -> Option<&'static VendorLayout> {
    match ats_type {
        AtsType::Taleo => Some(&TALEO),
        AtsType::SuccessFactors => Some(&SUCCESS_FACTORS),
        AtsType::Brassring => Some(&BRASSRING),
        AtsType::Icims => Some(&ICIMS),
        AtsType::Avature => Some(&AVATURE),
        _ => None,
    }
}

pub(super) fn extract(ats_type: AtsType, page: &ListingPage) -> Result<Extracted, AppError> {
    let Some(layout) = layout(ats_type) else {
        return Err(AppError::Generic(format!(
            "no selector layout for {ats_type}"
        )));
    };
    let records = scrape(layout, page)?;
    tracing::debug!(
        strategy = layout.name,
        url = %page.url,
        records = records.len(),
        "Selector scrape finished"
    );
    Ok(Extracted::complete(layout.name, pilot_only(records)))
}

fn scrape(layout: &VendorLayout, page: &ListingPage) -> Result<Vec<RawJob>, AppError> {
    let base = page_url(page)?;
    let title_sel = selector(layout.title)?;
    let location_sel = selector(layout.location)?;
    let doc = Html::parse_document(&page.body);

    for rows_css in layout.rows {
        let rows_sel = selector(rows_css)?;
        let records: Vec<RawJob> = doc
            .select(&rows_sel)
            .filter_map(|row| {
                let link = row.select(&title_sel).next()?;
                let url = resolve_href(&base, link.value().attr("href")?)?;
                let title = element_text(link);
                let mut job = RawJob::new(title, url);
                if let Some(loc) = row.select(&location_sel).next() {
                    job = job.with_location(element_text(loc));
                }
                Some(job)
            })
            .filter(|job| job.title.as_deref().is_some_and(|t| !t.is_empty()))
            .collect();
        if !records.is_empty() {
            return Ok(records);
        }
    }

    let links_sel = selector(layout.links)?;
    Ok(doc
        .select(&links_sel)
        .filter_map(|link| {
            let url = resolve_href(&base, link.value().attr("href")?)?;
            Some(RawJob::new(element_text(link), url))
        })
        .filter(|job| job.title.as_deref().is_some_and(|t| !t.is_empty()))
        .collect())
}
