//! In-page recorder installed both as an init script, so navigations
//! re-arm it, and evaluated directly against the current document.

/// Buffers DOM events into `window.__wrq`. The poll loop drains the
/// buffer through `window.__wrDrain()`. Installation is guarded so the
/// script can be injected more than once per document.
pub const RECORDER_JS: &str = r#"
(() => {
  if (window.__wrInstalled) { return; }
  window.__wrInstalled = true;
  window.__wrq = [];
  window.__wrPaused = false;

  const localSelector = (el) => {
    if (!el || !el.tagName) { return ''; }
    if (el.id) { return '#' + CSS.escape(el.id); }
    const dataAttrs = ['data-testid', 'data-test', 'data-cy', 'data-qa'];
    for (const attr of dataAttrs) {
      const v = el.getAttribute(attr);
      if (v) { return el.tagName.toLowerCase() + '[' + attr + '="' + v + '"]'; }
    }
    const name = el.getAttribute('name');
    if (name) { return el.tagName.toLowerCase() + '[name="' + name + '"]'; }
    const parts = [];
    let node = el;
    for (let depth = 0; node && node.tagName && depth < 3; depth++) {
      const tag = node.tagName.toLowerCase();
      if (tag === 'body' || tag === 'html') { parts.unshift(tag); break; }
      let nth = 1;
      let sib = node;
      while ((sib = sib.previousElementSibling)) {
        if (sib.tagName === node.tagName) { nth++; }
      }
      parts.unshift(tag + ':nth-of-type(' + nth + ')');
      node = node.parentElement;
    }
    return parts.join(' > ');
  };

  const push = (entry) => {
    if (window.__wrPaused) { return; }
    if (window.__wrq.length >= 5000) { window.__wrq.shift(); }
    window.__wrq.push(entry);
  };

  const base = (type, target) => ({
    type,
    selector: localSelector(target),
    tag: target && target.tagName ? target.tagName.toLowerCase() : '',
    text: target && target.textContent ? target.textContent.trim().slice(0, 50) : '',
    id: target && target.id ? target.id : '',
    name: target && target.getAttribute ? (target.getAttribute('name') || '') : '',
    classes: target && typeof target.className === 'string' ? target.className : '',
    url: location.href,
    ts: Date.now()
  });

  document.addEventListener('click', (e) => {
    const entry = base('click', e.target);
    entry.x = e.clientX;
    entry.y = e.clientY;
    push(entry);
  }, true);

  document.addEventListener('dblclick', (e) => {
    const entry = base('dblclick', e.target);
    entry.x = e.clientX;
    entry.y = e.clientY;
    push(entry);
  }, true);

  document.addEventListener('contextmenu', (e) => {
    const entry = base('contextmenu', e.target);
    entry.x = e.clientX;
    entry.y = e.clientY;
    push(entry);
  }, true);

  document.addEventListener('change', (e) => {
    const entry = base('change', e.target);
    entry.value = e.target && 'value' in e.target ? String(e.target.value) : '';
    push(entry);
  }, true);

  document.addEventListener('keydown', (e) => {
    if (e.key !== 'Enter' && e.key !== 'Tab' && e.key !== 'Escape') { return; }
    const entry = base('keydown', e.target);
    entry.value = e.key;
    push(entry);
  }, true);

  document.addEventListener('submit', (e) => {
    push(base('submit', e.target));
  }, true);

  let scrollTimer = null;
  window.addEventListener('scroll', () => {
    if (scrollTimer) { clearTimeout(scrollTimer); }
    scrollTimer = setTimeout(() => {
      push({
        type: 'scroll',
        selector: 'body',
        tag: 'body',
        text: '',
        url: location.href,
        x: window.scrollX,
        y: window.scrollY,
        ts: Date.now()
      });
    }, 250);
  }, true);

  window.__wrDrain = () => {
    const out = window.__wrq;
    window.__wrq = [];
    return out;
  };
})()
"#;

/// Drain expression used by the poll loop. Pages seen before the init
/// script landed have no recorder, which drains as an empty batch.
pub const DRAIN_JS: &str = "window.__wrDrain ? window.__wrDrain() : []";

pub const PAUSE_JS: &str = "window.__wrPaused = true";
pub const RESUME_JS: &str = "window.__wrPaused = false";

/// Listener teardown for cleanup. The capture-phase listeners stay on
/// the document, so the kill switch is the installed flag plus pause.
pub const TEARDOWN_JS: &str =
    "window.__wrPaused = true; window.__wrq = []; delete window.__wrDrain";
