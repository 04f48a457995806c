//! HTML email templates. All interpolated text is escaped.

use std::fmt::Write;

use crate::display::DisplayFields;

/// Subject and body of a rendered email.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn wrap_page(clinic_name: &str, inner: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Helvetica,Arial,sans-serif;\
         color:#1f2933;max-width:640px;margin:0 auto;\">{}\
         <p style=\"color:#7b8794;font-size:12px;margin-top:32px;\">{}</p></body></html>",
        inner,
        escape_html(clinic_name)
    )
}

fn row(html: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        let _ = write!(
            html,
            "<tr><td style=\"padding:4px 12px 4px 0;font-weight:bold;\">{}</td>\
             <td style=\"padding:4px 0;\">{}</td></tr>",
            escape_html(label),
            escape_html(v)
        );
    }
}

/// Clinician summary of one call.
pub fn doctor_summary(fields: &DisplayFields, clinic_name: &str) -> RenderedEmail {
    let i = &fields.insights;
    let subject = format!(
        "Call summary: {} ({}, {})",
        fields.patient_name, fields.outcome_label, fields.propensity.label
    );

    let mut html = String::new();
    let _ = write!(
        html,
        "<h2>Consultation call: {}</h2>",
        escape_html(&fields.patient_name)
    );

    html.push_str("<table>");
    row(&mut html, "Date", fields.formatted_date().as_deref());
    row(&mut html, "Duration", fields.formatted_duration().as_deref());
    row(&mut html, "Outcome", Some(fields.outcome_label));
    row(
        &mut html,
        "Propensity",
        Some(&format!(
            "{} ({}/100)",
            fields.propensity.label, fields.propensity.overall_score
        )),
    );
    row(&mut html, "Email", fields.email.as_deref());
    row(&mut html, "Occupation", i.occupation.as_deref());
    row(&mut html, "Sentiment", i.sentiment.as_deref());
    row(
        &mut html,
        "Vision impact",
        i.vision_scale.map(|s| format!("{}/10", s)).as_deref(),
    );
    row(&mut html, "Activities affected", i.activities.as_deref());
    row(&mut html, "Hobbies", i.hobbies.as_deref());
    row(&mut html, "Premium lens interest", i.premium_lens_interest.as_deref());
    row(&mut html, "Glasses preference", i.glasses_preference.as_deref());
    row(&mut html, "Laser interest", i.laser_interest.as_deref());
    row(&mut html, "Readiness", i.readiness.as_deref());
    row(&mut html, "Medical history", i.medical_history.as_deref());
    row(&mut html, "Concerns", i.concerns.as_deref());
    for other in &i.other {
        row(
            &mut html,
            &crate::display::humanize_key(&other.key),
            other.value.as_deref(),
        );
    }
    html.push_str("</table>");

    if let Some(summary) = &fields.summary {
        let _ = write!(html, "<h3>Summary</h3><p>{}</p>", escape_html(summary));
    }

    if !fields.evaluations.is_empty() {
        html.push_str("<h3>Evaluation</h3><ul>");
        for e in &fields.evaluations {
            let _ = write!(
                html,
                "<li><strong>{}</strong>: {}",
                escape_html(&e.criterion),
                escape_html(&e.result)
            );
            if let Some(r) = &e.rationale {
                let _ = write!(html, " ({})", escape_html(r));
            }
            html.push_str("</li>");
        }
        html.push_str("</ul>");
    }

    RenderedEmail {
        subject,
        html: wrap_page(clinic_name, &html),
    }
}

/// Patient email that carries the handout.
pub fn patient_handout(fields: &DisplayFields, clinic_name: &str) -> RenderedEmail {
    let mut html = String::new();
    let _ = write!(
        html,
        "<p>Dear {},</p>\
         <p>Thank you for speaking with us about your vision. We have attached a short \
         summary of your consultation call, including the lens options we discussed.</p>",
        escape_html(fields.first_name())
    );
    if let Some(date) = fields.formatted_date() {
        let _ = write!(
            html,
            "<p>Your call took place on {}.</p>",
            escape_html(&date)
        );
    }
    html.push_str(
        "<p>If you have any questions before your visit, simply reply to this email.</p>",
    );
    let _ = write!(html, "<p>Warm regards,<br>{}</p>", escape_html(clinic_name));

    RenderedEmail {
        subject: format!("Your consultation summary from {}", clinic_name),
        html: wrap_page(clinic_name, &html),
    }
}

/// Follow-up email once the personalized video is ready.
pub fn video_ready(fields: &DisplayFields, video_url: &str, clinic_name: &str) -> RenderedEmail {
    let url = escape_html(video_url);
    let mut html = String::new();
    let _ = write!(
        html,
        "<p>Dear {},</p>\
         <p>We made a short video showing what life after treatment could look like for you.</p>\
         <p><a href=\"{}\" style=\"display:inline-block;padding:10px 18px;background:#0b7285;\
         color:#ffffff;text-decoration:none;border-radius:4px;\">Watch your video</a></p>\
         <p style=\"font-size:12px;\">Or copy this link: {}</p>",
        escape_html(fields.first_name()),
        url,
        url
    );
    let _ = write!(html, "<p>Warm regards,<br>{}</p>", escape_html(clinic_name));

    RenderedEmail {
        subject: format!("Your personalized video from {}", clinic_name),
        html: wrap_page(clinic_name, &html),
    }
}
