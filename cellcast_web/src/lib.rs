use leptos::*;

use cellcast::presenter::{INSIGHTS_TITLE, SUMMARY_TITLE};
use cellcast::{
    ClientConfig, Controller, DashboardView, HttpTransport, PredictionTransport, Screen,
    SelectedFile, SubmitError, DEFAULT_FUTURE_CYCLES, MAX_FUTURE_CYCLES, MIN_FUTURE_CYCLES,
};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, HtmlInputElement};

#[cfg(feature = "chart_plotly")]
use cellcast::presenter::{format_tooltip, X_AXIS_LABEL, Y_AXIS_LABEL};

#[cfg(feature = "chart_plotly")]
use serde_wasm_bindgen::to_value as to_js;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("CELLCAST_COMMIT");

const PLOT_DIV: &str = "capacity_plot";
const LINE_COLOR: &str = "#007aff";
const ACCEPT: &str = ".csv,.xlsx";

type AppController = Controller<HttpTransport>;

/// Read the first file of an `<input type="file">`. `None` when nothing is
/// selected (the picker was cancelled).
async fn read_selected_file(input: &HtmlInputElement) -> Option<Result<SelectedFile, String>> {
    let file = input.files()?.item(0)?;
    let name = file.name();
    let outcome = match JsFuture::from(file.array_buffer()).await {
        Ok(buf) => {
            let u8arr = js_sys::Uint8Array::new(&buf);
            let mut bytes = vec![0u8; u8arr.length() as usize];
            u8arr.copy_to(&mut bytes[..]);
            SelectedFile::new(name, bytes).map_err(|err| err.to_string())
        }
        Err(_) => Err(format!("Could not read {name}")),
    };
    Some(outcome)
}

fn alert(message: &str) {
    if let Some(window) = web_sys::window() {
        let _ = window.alert_with_message(message);
    }
}

fn blob_url_from_str(s: &str) -> Option<String> {
    let arr = js_sys::Array::new();
    arr.push(&JsValue::from_str(s));
    let blob = Blob::new_with_str_sequence(&arr).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

#[cfg(feature = "chart_plotly")]
fn plot_xy(div_id: &str, traces: &js_sys::Array, layout: &JsValue) {
    let Some(div) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(div_id))
    else {
        return;
    };
    let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))
        .unwrap_or(JsValue::UNDEFINED);
    if let Ok(func) = js_sys::Reflect::get(&plotly, &JsValue::from_str("react"))
        .or_else(|_| js_sys::Reflect::get(&plotly, &JsValue::from_str("newPlot")))
        .and_then(|v| v.dyn_into::<js_sys::Function>())
    {
        let _ = func.call3(&JsValue::NULL, &JsValue::from(div), &JsValue::from(traces.clone()), layout);
    }
}

#[cfg(feature = "chart_plotly")]
fn prediction_trace(view: &DashboardView) -> serde_json::Value {
    let x: Vec<i64> = view.points.iter().map(|p| p.cycle).collect();
    let y: Vec<f64> = view.points.iter().map(|p| p.capacity).collect();
    let text: Vec<String> = view
        .points
        .iter()
        .map(|p| {
            let (label, value) = format_tooltip(p.cycle, p.capacity);
            format!("{label}<br>{value}")
        })
        .collect();
    serde_json::json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": "Predicted capacity",
        "x": x,
        "y": y,
        "text": text,
        "hovertemplate": "%{text}<extra></extra>",
        "line": { "width": 3, "color": LINE_COLOR },
        "marker": { "size": 6, "color": LINE_COLOR },
    })
}

#[cfg(feature = "chart_plotly")]
fn prediction_layout(view: &DashboardView) -> serde_json::Value {
    let mut xaxis = serde_json::json!({
        "title": { "text": X_AXIS_LABEL },
        "gridcolor": "#e0e8f3",
    });
    if let Some((lo, hi)) = view.x_range() {
        xaxis["range"] = serde_json::json!([lo, hi]);
    }
    let mut yaxis = serde_json::json!({
        "title": { "text": Y_AXIS_LABEL },
        "tickformat": ".2f",
        "gridcolor": "#e0e8f3",
    });
    match view.y_domain.bounds() {
        Some((lo, hi)) => yaxis["range"] = serde_json::json!([lo, hi]),
        None => yaxis["rangemode"] = serde_json::json!("tozero"),
    }
    serde_json::json!({
        "margin": { "t": 20, "r": 20, "b": 60, "l": 80 },
        "showlegend": false,
        "hovermode": "closest",
        "xaxis": xaxis,
        "yaxis": yaxis,
    })
}

#[cfg(feature = "chart_plotly")]
fn render_prediction_plot(view: &DashboardView) {
    if view.points.is_empty() {
        return;
    }
    let traces = js_sys::Array::new();
    if let Ok(trace) = to_js(&prediction_trace(view)) {
        traces.push(&trace);
    }
    if let Ok(layout) = to_js(&prediction_layout(view)) {
        plot_xy(PLOT_DIV, &traces, &layout);
    }
}

#[cfg(not(feature = "chart_plotly"))]
fn render_prediction_plot(_view: &DashboardView) {}

#[component]
pub fn App() -> impl IntoView {
    let controller: RwSignal<AppController> =
        create_rw_signal(Controller::new(HttpTransport::new(&ClientConfig::default())));
    let (busy, set_busy) = create_signal(false);

    let screen = create_memo(move |_| controller.with(|c| c.screen()));
    let dashboard = create_memo(move |_| controller.with(|c| c.dashboard_view()));

    // Redraw the chart whenever a new result lands on the dashboard.
    create_effect(move |_| {
        if let Some(view) = dashboard.get() {
            request_animation_frame(move || render_prediction_plot(&view));
        }
    });

    let on_file = move |ev: leptos::ev::Event| {
        let Some(input) = ev
            .target()
            .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
        else {
            return;
        };
        spawn_local(async move {
            match read_selected_file(&input).await {
                Some(Ok(file)) => controller.update(|c| {
                    c.select_file(file);
                }),
                Some(Err(message)) => {
                    input.set_value("");
                    alert(&message);
                }
                None => {}
            }
        });
    };

    let on_cycles = move |ev: leptos::ev::Event| {
        let raw = event_target_value(&ev);
        controller.update(|c| {
            c.input_future_cycles(&raw);
        });
    };

    let on_submit = move |_ev: leptos::ev::MouseEvent| {
        let Some(transport) = controller.try_with_untracked(|c| c.transport().clone()) else {
            return;
        };
        let (request, pending) = match controller.try_update(|c| c.prepare_submission()) {
            Some(Ok(prepared)) => prepared,
            Some(Err(err)) => {
                alert(&SubmitError::from(err).user_message());
                return;
            }
            None => return,
        };
        set_busy.set(true);
        spawn_local(async move {
            let outcome = transport.submit_prediction(request).await;
            let finished =
                controller.try_update(|c| c.finish_submission(pending, outcome).map(|_| ()));
            set_busy.set(false);
            if let Some(Err(err)) = finished {
                web_sys::console::error_1(&JsValue::from_str(&err.to_string()));
                alert(&err.user_message());
            }
        });
    };

    let on_reset = move |_ev: leptos::ev::MouseEvent| {
        controller.update(|c| {
            c.reset();
        });
    };

    let file_name = move || controller.with(|c| c.state().file_name().map(str::to_string));
    let cycles_value = move || {
        controller
            .with(|c| c.future_cycles())
            .unwrap_or(DEFAULT_FUTURE_CYCLES)
            .to_string()
    };

    // One object URL per dashboard result; the previous one is revoked.
    let result_href = create_memo(move |previous: Option<&String>| {
        if let Some(url) = previous.filter(|url| !url.is_empty()) {
            let _ = web_sys::Url::revoke_object_url(url);
        }
        controller
            .with(|c| {
                c.state()
                    .prediction()
                    .and_then(|r| serde_json::to_string_pretty(r).ok())
            })
            .and_then(|json| blob_url_from_str(&json))
            .unwrap_or_default()
    });

    view! {
        <main class="app">
            <header>
                <h1>"Battery Predictor"</h1>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </header>
            <Show
                when=move || screen.get() == Screen::Upload
                fallback=move || view! {
                    <section class="dashboard">
                        <div class="dashboard-header">
                            <h2>
                                "Prediction for: "
                                <span class="file-name">
                                    {move || dashboard.get().map(|v| v.file_name).unwrap_or_default()}
                                </span>
                            </h2>
                            <button class="btn" on:click=on_reset>"Run New Prediction"</button>
                        </div>
                        <div class="card">
                            <Show
                                when=move || dashboard.get().is_some_and(|v| !v.points.is_empty())
                                fallback=|| view! { <p class="note">"No predicted points returned."</p> }
                            >
                                <div id=PLOT_DIV class="plot"></div>
                            </Show>
                            <p class="note">
                                {move || dashboard.get().and_then(|v| v.summary.caption()).unwrap_or_default()}
                            </p>
                        </div>
                        {move || dashboard.get().and_then(|v| v.summary.card()).map(|card| view! {
                            <div class="card summary">
                                <h3>{SUMMARY_TITLE}</h3>
                                <p class="big">{format!("{:.2}", card.capacity)}" mAh"</p>
                                <p class="note">{format!("at cycle {}", card.cycle)}</p>
                            </div>
                        })}
                        {move || dashboard.get().filter(DashboardView::has_insights).map(|v| view! {
                            <div class="card insights">
                                <h3>{INSIGHTS_TITLE}</h3>
                                <ul>
                                    {v.insight_bullets().into_iter().map(|tip| view! { <li>{tip}</li> }).collect_view()}
                                </ul>
                            </div>
                        })}
                        <section class="downloads">
                            <a href=move || result_href.get() download="prediction.json">"Download prediction (JSON)"</a>
                        </section>
                    </section>
                }
            >
                <section class="card upload">
                    <h2>"Upload Your Data"</h2>
                    <p class="note">
                        "Upload a .csv or .xlsx file with your battery's cycle history to forecast its capacity."
                    </p>
                    <label class="dropzone">
                        <span>
                            {move || file_name().unwrap_or_else(|| "Choose a file".to_string())}
                        </span>
                        <input type="file" accept=ACCEPT on:change=on_file />
                    </label>
                    <label class="control-row">
                        "Future cycles to predict: "
                        <input
                            type="number"
                            min=MIN_FUTURE_CYCLES
                            max=MAX_FUTURE_CYCLES
                            prop:value=cycles_value
                            disabled=move || busy.get()
                            on:change=on_cycles
                        />
                    </label>
                    <Show when=move || file_name().is_some()>
                        <button class="btn" on:click=on_submit disabled=move || busy.get()>
                            {move || if busy.get() { "Processing..." } else { "Run Prediction" }}
                        </button>
                    </Show>
                </section>
            </Show>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}
