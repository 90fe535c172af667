//! HTML pages served to the phone.
//!
pub const HOME_PATH: &str = "/";
pub const DETECTOR_PATH: &str = "/robo_magellan";
pub const CONTROL_PATH: &str = "/control_center";

const STYLE: &str = r#"<style>
  body { font-family: sans-serif; display: flex; justify-content: center; color: #1f2937; }
  main { max-width: 768px; width: 100%; }
  h1 { text-align: center; font-size: 1.25rem; }
  .links, .buttons { display: grid; gap: 0.5rem; margin: 0.5rem; }
  .buttons { grid-template-columns: 1fr 1fr; }
  a, button { background: #3b82f6; color: white; font-weight: bold; padding: 1rem;
              border: none; border-radius: 0.25rem; text-align: center; text-decoration: none; font-size: 1.1rem; }
  a.home { background: #d1d5db; color: black; }
  button:disabled { opacity: 0.5; }
  #info { text-align: center; font-size: 0.9rem; margin: 0.5rem; }
  img { width: 100%; height: auto; }
</style>"#;

/// Menu linking the detector and the control center.
pub fn home_page() -> String {
    page(
        "Home!",
        &format!(
            r#"<div class="links">
  <a href="{DETECTOR_PATH}">&#x1F4F8; &nbsp; Cone Detector</a>
  <a href="{CONTROL_PATH}">&#x2699;&#xFE0F; &nbsp; Control Center</a>
</div>"#
        ),
    )
}

/// Camera selection, load progress and the annotated stream.
pub fn detector_page() -> String {
    page(
        "Camera Streamer!",
        r#"<div id="info"></div>
<div class="buttons">
  <button id="normal" onclick="toggle('normal')">Normal</button>
  <button id="telephoto" onclick="toggle('telephoto')">Telephoto</button>
</div>
<div><img id="stream" alt=""></div>
<script>
  let status = { streaming: null };

  function render() {
    const info = document.getElementById("info");
    if (status.progress && status.progress.loading) {
      info.innerHTML = "Loading: <strong>" + (status.progress.fraction * 100).toFixed(2) + "%</strong>";
    } else if (status.model_loaded) {
      info.innerHTML = "Model: <strong>" + status.model_name + "</strong>";
    } else {
      info.innerHTML = "";
    }
    for (const lens of ["normal", "telephoto"]) {
      const other = lens === "normal" ? "telephoto" : "normal";
      const button = document.getElementById(lens);
      button.disabled = status.streaming === other;
      button.textContent = status.streaming === lens ? "Stop" : lens[0].toUpperCase() + lens.slice(1);
    }
    const stream = document.getElementById("stream");
    const src = status.streaming ? "/stream" : "";
    if (stream.getAttribute("src") !== src) {
      stream.setAttribute("src", src);
    }
  }

  async function refresh() {
    const response = await fetch("/status");
    status = await response.json();
    render();
  }

  async function toggle(lens) {
    const url = status.streaming === lens ? "/camera/close" : "/camera/open?lens=" + lens;
    const response = await fetch(url, { method: "POST" });
    if (!response.ok) {
      alert(await response.text());
    }
    await refresh();
  }

  refresh();
  setInterval(refresh, 500);
</script>"#,
    )
}

pub fn control_page() -> String {
    page(
        "Control Center!",
        &format!(
            r#"<div class="links">
  <a class="home" href="{HOME_PATH}">Home</a>
</div>"#
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
{STYLE}
</head>
<body>
<main>
<h1>{title}</h1>
{body}
</main>
</body>
</html>
"#
    )
}
